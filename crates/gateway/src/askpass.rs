//! Askpass helper mode.
//!
//! When ssh needs a password it runs the program named by `SSH_ASKPASS` and
//! reads the answer from its stdout. The gateway names itself, passing the
//! secret in [`SECRET_ENV`]; `main` checks for it before parsing arguments
//! since ssh invokes the helper with the prompt as its only argument.

use std::io::{self, Write};

/// Environment variable carrying the password to the helper.
pub const SECRET_ENV: &str = "WEBSHELL_ASKPASS_SECRET";

/// Returns the secret if this process was started as an askpass helper.
pub fn secret_from_env() -> Option<String> {
    std::env::var(SECRET_ENV).ok()
}

/// Writes the answer ssh expects: the secret and a newline.
pub fn respond(out: &mut impl Write, secret: &str) -> io::Result<()> {
    writeln!(out, "{secret}")?;
    out.flush()
}
