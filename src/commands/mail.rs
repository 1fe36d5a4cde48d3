use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use super::Config;
use crate::{
    mail::{MailConfig, MailService},
    runtime::Runtime,
};

/// What to send, as given on the command line.
#[derive(Debug, Default)]
pub struct Outgoing<'a> {
    pub to: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
    pub reply_to: Option<&'a str>,
    pub cc: Vec<&'a str>,
    pub attachment: Option<&'a Path>,
    /// Used when the attachment's type cannot be guessed from its name.
    pub attachment_type: Option<&'a str>,
}

/// Send a plain-text email, optionally with one attachment, and print its
/// Gmail ID
///
/// With `test_recipient`, the message goes there instead and CC is dropped.
/// With `trash`, the message is removed from the sender's Sent folder.
#[tracing::instrument(skip(config, outgoing))]
pub fn send<R: Runtime>(
    config: Config<R>,
    sender: &str,
    outgoing: &Outgoing<'_>,
    test_recipient: Option<&str>,
    trash: bool,
) -> Result<()> {
    let settings = match test_recipient {
        Some(recipient) => MailConfig::new(recipient).with_force_test_email(true),
        None => MailConfig::new(outgoing.to),
    };
    let mail = MailService::new(sender, config.runtime, config.tokens);
    mail.configure(config.service, settings);

    let mut message = mail.build_message(
        outgoing.to,
        outgoing.subject,
        outgoing.body,
        outgoing.reply_to,
        &outgoing.cc,
    )?;
    if let Some(path) = outgoing.attachment {
        let attachment = mail
            .attach(path, outgoing.attachment_type)
            .with_context(|| format!("Failed to attach {}", path.display()))?;
        message = message.with_attachment(attachment);
    }
    info!("Sending {}", message);

    let id = if trash {
        mail.send_and_trash_message(&message)
    } else {
        mail.send_message(&message)
    };
    let id = id.with_context(|| format!("Failed to send email to {}", message.to))?;
    println!("{}", id);
    Ok(())
}
