//! Gmail integration: one delegated handle per sender.

mod client;

pub use client::{
    Attachment, DEFAULT_ATTACHMENT_TYPE, GMAIL_API_BASE, GMAIL_SCOPES, GmailConnector, MailConfig,
    MailService, Message,
};
