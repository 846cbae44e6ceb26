/// Abstraction over user-facing output.
///
/// Command modules use this trait instead of `println!`/`eprintln!` so that
/// output can be captured in tests or redirected to a machine-readable
/// format later.
pub trait UserOutput: Send + Sync {
    /// Informational status message (e.g., "Stopping services...")
    fn status(&self, message: &str);

    /// Success message (e.g., "All services started")
    fn success(&self, message: &str);

    /// Warning message (e.g., "frontend failed to start")
    fn warning(&self, message: &str);

    /// Error message
    fn error(&self, message: &str);

    /// A blank line separator.
    fn blank(&self);
}

/// Standard CLI output: stdout for normal messages, stderr with ANSI red
/// for errors.
pub struct CliOutput;

impl UserOutput for CliOutput {
    fn status(&self, message: &str) {
        println!("{}", message);
    }

    fn success(&self, message: &str) {
        println!("{}", message);
    }

    fn warning(&self, message: &str) {
        eprintln!("\x1b[33m{}\x1b[0m", message);
    }

    fn error(&self, message: &str) {
        eprintln!("\x1b[31m{}\x1b[0m", message);
    }

    fn blank(&self) {
        println!();
    }
}
