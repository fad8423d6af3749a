//! Passphrase sources: stdin, flag or environment, interactive prompt.
//!
//! Every intermediate buffer holding a typed or piped passphrase is a
//! [`Zeroizing`] string, so it is wiped once the [`Passphrase`] is built.

use std::io::{self, IsTerminal};

use anyhow::{Context, Result};
use lockbox_core::Passphrase;
use zeroize::Zeroizing;

/// Password options extracted from the CLI.
#[derive(Clone, Default)]
pub struct PasswordOptions {
    pub password: Option<Zeroizing<String>>,
    pub password_stdin: bool,
}

/// Get a passphrase using the priority chain:
/// 1. --password-stdin
/// 2. --password / LOCKBOX_PASSWORD
/// 3. Interactive prompt
pub fn get_passphrase(opts: &PasswordOptions) -> Result<Passphrase> {
    if opts.password_stdin {
        read_password_from_stdin()
    } else if let Some(ref password) = opts.password {
        Ok(Passphrase::new(password.as_str()))
    } else {
        prompt_passphrase("Passphrase: ")
    }
}

/// Like [`get_passphrase`], but an interactive prompt asks twice.
pub fn get_new_passphrase(opts: &PasswordOptions) -> Result<Passphrase> {
    if opts.password_stdin || opts.password.is_some() {
        return get_passphrase(opts);
    }

    let first = prompt("New passphrase: ")?;
    let second = prompt("Confirm passphrase: ")?;
    confirmed(&first, &second)
}

fn prompt(text: &str) -> Result<Zeroizing<String>> {
    rpassword::prompt_password(text)
        .map(Zeroizing::new)
        .context("Failed to read passphrase")
}

fn prompt_passphrase(text: &str) -> Result<Passphrase> {
    let password = prompt(text)?;
    non_empty(&password)
}

fn read_password_from_stdin() -> Result<Passphrase> {
    if io::stdin().is_terminal() {
        anyhow::bail!(
            "--password-stdin requires password to be piped in.\n\
             Example: echo \"$SECRET\" | lockbox --password-stdin serve ~/folder"
        );
    }

    let mut line = Zeroizing::new(String::new());
    io::stdin().read_line(&mut line)?;
    from_stdin_line(&line)
}

/// Passphrase from one piped line, without its line ending.
fn from_stdin_line(line: &str) -> Result<Passphrase> {
    let password = line.trim_end_matches('\n').trim_end_matches('\r');
    if password.is_empty() {
        anyhow::bail!("Password from stdin is empty");
    }
    Ok(Passphrase::new(password))
}

fn confirmed(first: &str, second: &str) -> Result<Passphrase> {
    if first != second {
        anyhow::bail!("Passphrases do not match");
    }
    non_empty(first)
}

fn non_empty(password: &str) -> Result<Passphrase> {
    if password.is_empty() {
        anyhow::bail!("Passphrase must not be empty");
    }
    Ok(Passphrase::new(password))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdin_line_endings_are_stripped() {
        assert!(!from_stdin_line("secret\r\n").unwrap().is_empty());
        assert!(!from_stdin_line("secret").unwrap().is_empty());
        let err = from_stdin_line("\r\n").unwrap_err();
        assert!(err.to_string().contains("Password from stdin is empty"));
    }

    #[test]
    fn test_confirmation_must_match() {
        assert!(confirmed("one", "one").is_ok());
        let err = confirmed("one", "two").unwrap_err();
        assert!(err.to_string().contains("do not match"));
        assert!(confirmed("", "").is_err());
    }

    #[test]
    fn test_flag_password_is_used_before_prompting() {
        let opts = PasswordOptions {
            password: Some(Zeroizing::new("from-flag".to_string())),
            password_stdin: false,
        };
        assert!(!get_passphrase(&opts).unwrap().is_empty());
        assert!(!get_new_passphrase(&opts).unwrap().is_empty());
    }
}
