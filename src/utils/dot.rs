//! DOT format utilities for graph visualization.
//!
//! Both the connection graph and the call graph can render themselves as
//! DOT for inspection with Graphviz. This module holds the pieces they
//! share: label escaping and the common digraph preamble.

use std::fmt::Write;

/// Escapes a string for safe use in DOT format labels and identifiers.
///
/// Handles the characters with special meaning in DOT: quotes, backslashes,
/// newlines, and angle brackets.
///
/// # Examples
///
/// ```rust,ignore
/// use refscope::utils::escape_dot;
///
/// assert_eq!(escape_dot("Vec<u8>"), "Vec\\<u8\\>");
/// ```
#[must_use]
pub fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "")
        .replace('<', "\\<")
        .replace('>', "\\>")
}

/// Writes the shared digraph preamble: name, title label, and default
/// node/edge styling.
pub(crate) fn dot_header(out: &mut String, name: &str, title: &str) {
    let _ = writeln!(out, "digraph {name} {{");
    let _ = writeln!(out, "    label=\"{}\";", escape_dot(title));
    out.push_str("    labelloc=t;\n");
    out.push_str("    node [shape=box, fontname=\"Courier\", fontsize=10];\n");
    out.push_str("    edge [fontname=\"Courier\", fontsize=9];\n");
    out.push_str("    rankdir=TB;\n\n");
}
