//! Line-oriented command console over standard input.
//!
//! Collaborator glue around the server core: commands are registered by name
//! and dispatched with whitespace-split arguments. `help` and `quit` are
//! built in.

use std::collections::BTreeMap;
use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};

pub type CommandHandler = Box<dyn Fn(&[&str]) + Send + Sync>;

pub struct Console {
    commands: BTreeMap<String, CommandHandler>,
}

impl Console {
    pub fn new() -> Self {
        Self {
            commands: BTreeMap::new(),
        }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: impl Fn(&[&str]) + Send + Sync + 'static,
    ) {
        self.commands.insert(name.into(), Box::new(handler));
    }

    /// Read commands until `quit` or end of input.
    pub async fn run(&self) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        self.prompt();
        while let Ok(Some(line)) = lines.next_line().await {
            if !self.dispatch(&line) {
                break;
            }
            self.prompt();
        }
    }

    fn prompt(&self) {
        print!("> ");
        let _ = std::io::stdout().flush();
    }

    /// Handle one input line; returns false when the console should exit.
    fn dispatch(&self, line: &str) -> bool {
        let mut tokens = line.split_whitespace();
        let Some(command) = tokens.next() else {
            return true;
        };
        let args: Vec<&str> = tokens.collect();
        match command {
            "quit" | "exit" => false,
            "help" => {
                println!("commands: help, quit{}", {
                    let names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
                    if names.is_empty() {
                        String::new()
                    } else {
                        format!(", {}", names.join(", "))
                    }
                });
                true
            }
            name => {
                match self.commands.get(name) {
                    Some(handler) => handler(&args),
                    None => println!("unknown command {:?}, try \"help\"", name),
                }
                true
            }
        }
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn dispatch_invokes_the_registered_handler_with_args() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut console = Console::new();
        let seen = calls.clone();
        console.register("ping", move |args| {
            assert_eq!(args, ["a", "b"]);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert!(console.dispatch("ping a b"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn quit_stops_the_loop_and_blank_lines_do_not() {
        let console = Console::new();
        assert!(console.dispatch(""));
        assert!(console.dispatch("   "));
        assert!(console.dispatch("unknown"));
        assert!(!console.dispatch("quit"));
        assert!(!console.dispatch("exit"));
    }
}
