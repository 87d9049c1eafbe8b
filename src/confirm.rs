//! Confirmation collaborator for mutating controller steps: force mode always proceeds, the
//! real prompt reads a yes/no answer from stdin, ported from the original script's
//! `query_yes_no` (default answer "yes" on bare Enter).

use async_trait::async_trait;
use std::io::{self, Write};

#[async_trait]
pub trait Confirm: Send + Sync {
    async fn ask(&self, question: &str) -> bool;
}

pub struct ForceConfirm;

#[async_trait]
impl Confirm for ForceConfirm {
    async fn ask(&self, _question: &str) -> bool {
        true
    }
}

pub struct StdinConfirm;

#[async_trait]
impl Confirm for StdinConfirm {
    async fn ask(&self, question: &str) -> bool {
        tokio::task::block_in_place(|| prompt(question))
    }
}

/// Reads a y/n answer from stdin, reprompting on anything but a recognized answer or bare Enter.
/// Default answer on bare Enter is "yes".
pub fn prompt(question: &str) -> bool {
    loop {
        print!("{question} [Y/n] ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        if io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        match line.trim().to_lowercase().as_str() {
            "" | "y" | "yes" => return true,
            "n" | "no" => return false,
            _ => println!("Please respond with 'yes' or 'no' (or 'y' or 'n')."),
        }
    }
}
