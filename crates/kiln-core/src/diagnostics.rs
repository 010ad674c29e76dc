//! Build failures rendered as browser-loadable assets.
//!
//! A failed build still answers `200` with the requested content type, so
//! the browser executes (or applies) the body and the developer sees the
//! error in the console and on the page instead of a broken import.

use crate::resolve::AssetKind;

/// Render a failure for an asset of `kind`.
pub fn synthesize(kind: AssetKind, path: &str, message: &str) -> String {
    match kind {
        AssetKind::Script => synthesize_script(path, message),
        AssetKind::Style => synthesize_stylesheet(path, message),
    }
}

/// A script that logs the failure and, when a DOM is present, shows it in a
/// fixed overlay.
///
/// `path` and `message` are embedded only as JSON string literals, which are
/// valid JavaScript string literals, so no input can terminate the literal
/// or the surrounding script.
pub fn synthesize_script(path: &str, message: &str) -> String {
    let path = js_string(path);
    let message = js_string(message);
    format!(
        r#"const __kiln_path = {path};
const __kiln_message = {message};
console.error("[kiln] build failed: " + __kiln_path + "\n" + __kiln_message);
if (typeof document !== "undefined") {{
  const show = () => {{
    const overlay = document.createElement("pre");
    overlay.setAttribute("data-kiln-error", __kiln_path);
    overlay.style.cssText = "position:fixed;inset:0;z-index:2147483647;margin:0;padding:24px;overflow:auto;background:rgba(24,0,0,.92);color:#ffb4b4;font:13px/1.5 ui-monospace,monospace;white-space:pre-wrap";
    overlay.textContent = "Build failed: " + __kiln_path + "\n\n" + __kiln_message;
    document.body.appendChild(overlay);
  }};
  if (document.body) show(); else document.addEventListener("DOMContentLoaded", show);
}}
export {{}};
"#
    )
}

/// A stylesheet that prints the failure above the page.
pub fn synthesize_stylesheet(path: &str, message: &str) -> String {
    let text = format!("Build failed: {}\n\n{}", path, message);
    format!(
        "body::before {{\n  content: {};\n  display: block;\n  white-space: pre-wrap;\n  padding: 24px;\n  background: #180000;\n  color: #ffb4b4;\n  font: 13px/1.5 ui-monospace, monospace;\n}}\n",
        css_string(&text)
    )
}

fn js_string(text: &str) -> String {
    let encoded = serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string());
    // JSON leaves `</script` and the line separators intact; escape them so
    // the literal is also safe inline and in pre-ES2019 engines.
    encoded
        .replace("</", "<\\/")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

fn css_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\A "),
            '<' => out.push_str("\\3C "),
            c if c.is_control() => out.push_str(&format!("\\{:X} ", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
