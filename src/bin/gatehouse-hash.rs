//! Prints the bcrypt hash of a password, for the `password_hash` field of an
//! auth entry in the gatehouse configuration.

use std::io;
use std::process::ExitCode;

use clap::Parser;

use gatehouse::config::PASSWORD_HASH_COST;

/// Hash a password for the gatehouse configuration
#[derive(Parser, Debug)]
#[command(name = "gatehouse-hash", version, about)]
struct Args {
    /// Password to hash; prompted for without echo when omitted
    password: Option<String>,

    /// bcrypt cost factor
    #[arg(long, default_value_t = PASSWORD_HASH_COST)]
    cost: u32,
}

const PROMPT: &str = "Please enter the password: ";

/// Takes the password from the command line, or prompts on the terminal with
/// echo turned off.
fn password(args: Args, prompt: impl FnOnce() -> io::Result<String>) -> io::Result<String> {
    match args.password {
        Some(password) => Ok(password),
        None => prompt(),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let cost = args.cost;

    let password = match password(args, || rpassword::prompt_password(PROMPT)) {
        Ok(password) => password,
        Err(e) => {
            eprintln!("Failed to read the password: {e}");
            return ExitCode::FAILURE;
        }
    };

    match bcrypt::hash(password, cost) {
        Ok(hash) => {
            println!("{hash}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to hash the password: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_skips_the_prompt() {
        let args = Args::try_parse_from(["gatehouse-hash", "s3cret"]).unwrap();
        let result = password(args, || panic!("prompted although a password was given"));
        assert_eq!(result.unwrap(), "s3cret");
    }

    #[test]
    fn test_missing_argument_uses_the_hidden_prompt() {
        let args = Args::try_parse_from(["gatehouse-hash", "--cost", "4"]).unwrap();
        assert_eq!(args.cost, 4);
        let result = password(args, || Ok("typed".to_string()));
        assert_eq!(result.unwrap(), "typed");
    }

    #[test]
    fn test_prompt_failure_is_reported() {
        let args = Args::try_parse_from(["gatehouse-hash"]).unwrap();
        let result = password(args, || Err(io::Error::other("no tty")));
        assert!(result.is_err());
    }

    #[test]
    fn test_extra_arguments_are_rejected() {
        assert!(Args::try_parse_from(["gatehouse-hash", "a", "b"]).is_err());
    }
}
