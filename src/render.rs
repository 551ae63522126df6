use crate::config::RenderOptions;
use crate::thread::ThreadView;
use chrono::Local;
use std::fmt;

/// Renders a thread as indented text, one block per message, replies nested
/// under the message they answer. Unread messages are flagged with `*`.
///
/// Fails if `options.date_format` is not a valid strftime pattern.
pub fn render_thread(view: &ThreadView, options: &RenderOptions) -> Result<String, fmt::Error> {
    let mut out = String::new();
    write_thread(&mut out, view, options)?;
    Ok(out)
}

pub fn write_thread<W: fmt::Write>(
    out: &mut W,
    view: &ThreadView,
    options: &RenderOptions,
) -> fmt::Result {
    if view.is_empty() {
        return writeln!(out, "(empty thread)");
    }

    for (depth, node) in view.walk() {
        let msg = node.message();
        let pad = " ".repeat(depth * options.indent);
        let marker = if msg.was_read { ' ' } else { '*' };
        let date = msg.date.with_timezone(&Local).format(&options.date_format);

        writeln!(out, "{pad}{marker} {}", msg.subject)?;
        writeln!(out, "{pad}  From: {}", msg.from)?;
        writeln!(out, "{pad}  Date: {date}")?;
        if options.show_content {
            let body = clean_body(&msg.content);
            if !body.is_empty() {
                writeln!(out)?;
                for line in body.lines() {
                    if line.is_empty() {
                        writeln!(out)?;
                    } else {
                        writeln!(out, "{pad}  {line}")?;
                    }
                }
            }
        }
        writeln!(out)?;
    }

    Ok(())
}

/// Normalizes line endings, trims trailing whitespace and collapses runs of
/// blank lines to a single one. Leading and trailing blank lines are dropped.
pub fn clean_body(body: &str) -> String {
    let normalized = body.replace("\r\n", "\n").replace('\r', "\n");
    let mut result = String::with_capacity(normalized.len());
    let mut pending_blank = false;

    for line in normalized.split('\n').map(str::trim_end) {
        if line.is_empty() {
            pending_blank = !result.is_empty();
            continue;
        }
        if !result.is_empty() {
            result.push('\n');
            if pending_blank {
                result.push('\n');
            }
        }
        result.push_str(line);
        pending_blank = false;
    }

    result
}
