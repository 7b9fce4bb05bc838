//! Out-of-band credentials and the interactive prompts that collect them.

use crate::error::{PowerError, Result};
use dialoguer::{Confirm, Input, Password};
use std::fmt;

/// Username/secret pair for out-of-band power commands.
///
/// Passed by value into waiters. The secret is never printed: `Debug`
/// redacts it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// Use whatever was supplied up front, prompting for the rest.
pub fn resolve_credentials(
    username: Option<String>,
    password: Option<String>,
    username_prompt: &str,
    password_prompt: &str,
) -> Result<Credentials> {
    let username = match username {
        Some(username) => username,
        None => Input::<String>::new()
            .with_prompt(username_prompt)
            .interact_text()?,
    };

    let password = match password {
        Some(password) => password,
        None => Password::new().with_prompt(password_prompt).interact()?,
    };

    Ok(Credentials::new(username, password))
}

/// Ask the operator to confirm a disruptive action.
pub fn prompt_continue(action_msg: &str) -> Result<()> {
    println!("Proceeding with {}.", action_msg);
    let proceed = Confirm::new()
        .with_prompt("Do you want to continue?")
        .default(false)
        .interact()?;

    if proceed {
        Ok(())
    } else {
        println!("Will not proceed with {}. Exiting.", action_msg);
        Err(PowerError::Aborted)
    }
}
