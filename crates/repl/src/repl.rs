//! Interactive REPL
//!
//! rustyline-driven line loop with persistent history. Input is
//! accumulated until delimiters balance, so multi-line forms paste
//! cleanly. Results print readably; the engine maintains *1 *2 *3 *e.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use loam_runtime::call;
use loam_runtime::context::RuntimeContext;
use loam_runtime::engine;
use loam_runtime::error::EvalError;

pub fn run(ctx: &mut RuntimeContext) -> i32 {
    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("failed to start line editor: {}", e);
            return 2;
        }
    };
    let history_path = dirs::data_dir().map(|d| d.join("loam").join("history.txt"));
    if let Some(path) = &history_path {
        let _ = std::fs::create_dir_all(path.parent().expect("history path has a parent"));
        let _ = editor.load_history(path);
    }

    println!("Loam {} ({:?} backend)", env!("CARGO_PKG_VERSION"), ctx.config.backend);

    let mut pending = String::new();
    loop {
        let prompt = if pending.is_empty() { "loam> " } else { "  ..> " };
        match editor.readline(prompt) {
            Ok(line) => {
                if pending.is_empty() && line.trim().is_empty() {
                    continue;
                }
                pending.push_str(&line);
                pending.push('\n');
                if !balanced(&pending) {
                    continue;
                }
                let source = std::mem::take(&mut pending);
                let _ = editor.add_history_entry(source.trim());
                match engine::evaluate_source(ctx, &source, "<repl>") {
                    Ok(v) => match call::pr_str_value(ctx, &v) {
                        Ok(s) => println!("{}", s),
                        Err(_) => println!("#<unprintable>"),
                    },
                    Err(e) => eprintln!("{}", describe_error(ctx, &e)),
                }
            }
            Err(ReadlineError::Interrupted) => {
                pending.clear();
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("read error: {}", e);
                break;
            }
        }
    }

    if let Some(path) = &history_path {
        let _ = editor.save_history(path);
    }
    0
}

pub fn describe_error(ctx: &mut RuntimeContext, e: &EvalError) -> String {
    match e {
        EvalError::Diag(d) => d.to_string(),
        EvalError::Thrown(v) => {
            let printed = call::pr_str_value(ctx, v)
                .unwrap_or_else(|_| "#<unprintable>".to_string());
            format!("uncaught exception: {}", printed)
        }
        EvalError::Recur(_) => "internal error: recur escaped its loop".to_string(),
    }
}

/// Delimiter balance for multi-line input, ignoring strings, comments,
/// and character literals.
fn balanced(src: &str) -> bool {
    let mut depth = 0i64;
    let mut chars = src.chars().peekable();
    let mut in_string = false;
    while let Some(c) = chars.next() {
        if in_string {
            match c {
                '\\' => {
                    chars.next();
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            ';' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '\\' => {
                chars.next();
            }
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
    }
    depth <= 0 && !in_string
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_tracks_nesting() {
        assert!(balanced("(+ 1 2)"));
        assert!(!balanced("(let [x 1]"));
        assert!(balanced("(let [x 1] x)"));
    }

    #[test]
    fn test_balanced_ignores_strings_and_comments() {
        assert!(balanced("\"(\""));
        assert!(balanced("; (unclosed in comment\n1"));
        assert!(!balanced("\"unclosed"));
        assert!(balanced("\\( 1"));
    }
}
