use std::fmt;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::auth::{Credentials, TokenSource};
use crate::config::ServiceConfig;
use crate::error::{GapiError, Result};
use crate::http::ApiClient;
use crate::runtime::{RealRuntime, Runtime};
use crate::service::{Connector, HandleState, ServiceHandle};

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com";

pub const GMAIL_SCOPES: &[&str] = &[
    "https://mail.google.com/",
    "https://www.googleapis.com/auth/gmail.compose",
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.send",
];

/// Gmail-specific settings, shared by every sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailConfig {
    /// Recipient of every message when `force_test_email` is set.
    pub test_recipient: String,
    pub force_test_email: bool,
}

impl MailConfig {
    pub fn new(test_recipient: impl Into<String>) -> Self {
        Self {
            test_recipient: test_recipient.into(),
            force_test_email: false,
        }
    }

    pub fn with_force_test_email(mut self, force: bool) -> Self {
        self.force_test_email = force;
        self
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GmailConnector;

impl Connector for GmailConnector {
    type Client = ApiClient;

    fn name(&self) -> &'static str {
        "gmail"
    }

    fn scopes(&self) -> &'static [&'static str] {
        GMAIL_SCOPES
    }

    fn connect<R: Runtime>(
        &self,
        credentials: &Credentials,
        config: &ServiceConfig,
        _runtime: &R,
    ) -> Result<ApiClient> {
        ApiClient::new(config.api_base_or(GMAIL_API_BASE), credentials)
    }
}

/// MIME type of attachments whose type cannot be guessed.
pub const DEFAULT_ATTACHMENT_TYPE: &str = "application/octet-stream";

/// A file sent along with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl Attachment {
    /// Reads `path` through `runtime`.
    ///
    /// The MIME type comes from the file extension when it is a known one,
    /// then from `fallback`, then [`DEFAULT_ATTACHMENT_TYPE`].
    pub fn from_file<R: Runtime>(runtime: &R, path: &Path, fallback: Option<&str>) -> Result<Self> {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| GapiError::InvalidInput(format!("{} has no file name", path.display())))?;
        let data = runtime.read(path)?;
        let mime_type = guess_mime_type(path)
            .or(fallback)
            .unwrap_or(DEFAULT_ATTACHMENT_TYPE)
            .to_string();
        Ok(Self {
            filename,
            mime_type,
            data,
        })
    }
}

// Compressed variants (".csv.gz") have no entry and use the fallback.
fn guess_mime_type(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime_type = match extension.as_str() {
        "csv" => "text/csv",
        "txt" | "log" => "text/plain",
        "htm" | "html" => "text/html",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        _ => return None,
    };
    Some(mime_type)
}

/// A plain-text email, optionally carrying one attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub to: String,
    pub from: String,
    pub reply_to: Option<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachment: Option<Attachment>,
}

impl Message {
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// Fails if any header value would span more than one line.
    pub fn check_headers(&self) -> Result<()> {
        let mut fields = vec![
            ("To", self.to.as_str()),
            ("From", self.from.as_str()),
            ("Subject", self.subject.as_str()),
        ];
        fields.extend(self.reply_to.as_deref().map(|value| ("Reply-To", value)));
        fields.extend(self.cc.iter().map(|value| ("CC", value.as_str())));
        if let Some(attachment) = &self.attachment {
            fields.push(("Content-Type", attachment.mime_type.as_str()));
            fields.push(("Content-Disposition", attachment.filename.as_str()));
        }
        match fields
            .into_iter()
            .find(|(_, value)| value.contains(['\r', '\n']))
        {
            Some((name, _)) => Err(GapiError::InvalidInput(format!(
                "line break in {} header",
                name
            ))),
            None => Ok(()),
        }
    }

    /// RFC 5322 rendering with CRLF line endings. A message with an
    /// attachment becomes `multipart/mixed`.
    pub fn to_rfc822(&self) -> Result<String> {
        self.check_headers()?;

        let mut out = String::new();
        out.push_str(&format!("To: {}\r\n", self.to));
        out.push_str(&format!("From: {}\r\n", self.from));
        if let Some(reply_to) = &self.reply_to {
            out.push_str(&format!("Reply-To: {}\r\n", reply_to));
        }
        if !self.cc.is_empty() {
            out.push_str(&format!("CC: {}\r\n", self.cc.join(",")));
        }
        out.push_str(&format!("Subject: {}\r\n", encode_header(&self.subject)));
        out.push_str("MIME-Version: 1.0\r\n");

        let Some(attachment) = &self.attachment else {
            push_text_part(&mut out, &self.body);
            return Ok(out);
        };

        let boundary = format!("==============={:020}==", rand::random::<u64>());
        out.push_str(&format!(
            "Content-Type: multipart/mixed; boundary=\"{}\"\r\n\r\n",
            boundary
        ));
        out.push_str(&format!("--{}\r\n", boundary));
        push_text_part(&mut out, &self.body);
        out.push_str(&format!("--{}\r\n", boundary));
        out.push_str(&format!("Content-Type: {}\r\n", attachment.mime_type));
        out.push_str("Content-Transfer-Encoding: base64\r\n");
        out.push_str(&format!(
            "Content-Disposition: attachment; filename=\"{}\"\r\n\r\n",
            encode_header(&attachment.filename).replace('"', "\\\"")
        ));
        let encoded = STANDARD.encode(&attachment.data);
        let mut rest = encoded.as_str();
        while rest.len() > BASE64_LINE_LENGTH {
            let (line, tail) = rest.split_at(BASE64_LINE_LENGTH);
            out.push_str(line);
            out.push_str("\r\n");
            rest = tail;
        }
        out.push_str(rest);
        out.push_str("\r\n");
        out.push_str(&format!("--{}--\r\n", boundary));
        Ok(out)
    }

    /// The `raw` field expected by `messages.send`.
    pub fn raw(&self) -> Result<String> {
        Ok(URL_SAFE.encode(self.to_rfc822()?))
    }
}

const BASE64_LINE_LENGTH: usize = 76;

fn push_text_part(out: &mut String, body: &str) {
    out.push_str("Content-Type: text/plain; charset=\"utf-8\"\r\n");
    out.push_str("Content-Transfer-Encoding: 8bit\r\n");
    out.push_str("\r\n");
    for line in body.lines() {
        out.push_str(line);
        out.push_str("\r\n");
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "to {} from {}: {}", self.to, self.from, self.subject)
    }
}

/// Non-ASCII header values use the RFC 2047 base64 form.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?utf-8?b?{}?=", STANDARD.encode(value))
    }
}

#[derive(Debug, Deserialize)]
struct Sent {
    #[serde(default)]
    id: Option<String>,
}

/// Gmail service acting as one sender.
pub struct MailService<R: Runtime = RealRuntime> {
    handle: ServiceHandle<GmailConnector, R>,
    sender: String,
    settings: Arc<RwLock<Option<MailConfig>>>,
}

impl<R: Runtime> MailService<R> {
    /// Creates an unconfigured service sending as `sender`.
    pub fn new(sender: impl Into<String>, runtime: R, tokens: Arc<dyn TokenSource>) -> Self {
        let root = ServiceHandle::new(GmailConnector, runtime, tokens);
        let sender = sender.into();
        Self {
            handle: root.for_user(sender.clone()),
            sender,
            settings: Arc::new(RwLock::new(None)),
        }
    }

    pub fn configure(&self, config: ServiceConfig, mail: MailConfig) {
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = Some(mail);
        self.handle.configure(config);
    }

    /// Another sender sharing this service's configuration.
    pub fn for_sender(&self, sender: impl Into<String>) -> Self {
        let sender = sender.into();
        Self {
            handle: self.handle.for_user(sender.clone()),
            sender,
            settings: Arc::clone(&self.settings),
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn get_service(&self) -> Result<Arc<ApiClient>> {
        self.handle.get_service()
    }

    pub fn reset(&self) {
        self.handle.reset()
    }

    pub fn state(&self) -> HandleState {
        self.handle.state()
    }

    fn mail_config(&self) -> Option<MailConfig> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Builds a message from this sender. With `force_test_email`, the
    /// message goes to the test recipient only and CC is dropped.
    ///
    /// Header values containing line breaks are rejected.
    pub fn build_message(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        reply_to: Option<&str>,
        cc: &[&str],
    ) -> Result<Message> {
        let forced = self.mail_config().filter(|c| c.force_test_email);
        let (to, cc) = match forced {
            Some(config) => (config.test_recipient, Vec::new()),
            None => (to.to_string(), cc.iter().map(|s| s.to_string()).collect()),
        };
        let message = Message {
            to,
            from: self.sender.clone(),
            reply_to: reply_to.map(str::to_string),
            cc,
            subject: subject.to_string(),
            body: body.to_string(),
            attachment: None,
        };
        message.check_headers()?;
        Ok(message)
    }

    /// Reads a local file to attach, see [`Attachment::from_file`].
    pub fn attach(&self, path: &Path, mime_type: Option<&str>) -> Result<Attachment> {
        Attachment::from_file(self.handle.runtime(), path, mime_type)
    }

    /// Sends `message` and returns its Gmail ID.
    #[tracing::instrument(skip(self, message), fields(sender = %self.sender))]
    pub fn send_message(&self, message: &Message) -> Result<String> {
        let path = format!("gmail/v1/users/{}/messages/send", self.sender);
        let body = json!({ "raw": message.raw()? });
        let sent: Sent = self
            .handle
            .call(|client| client.send_json(Method::POST, &path, &[], &body))?;
        let id = sent
            .id
            .ok_or_else(|| GapiError::Unexpected(format!("Could not send email: {}", message)))?;
        info!(logger = %self.handle.logger(), "Sent message {} ({})", id, message);
        Ok(id)
    }

    pub fn trash_message(&self, id: &str) -> Result<()> {
        let path = format!("gmail/v1/users/{}/messages/{}/trash", self.sender, id);
        self.handle.call(|client| {
            client.send_json::<_, serde_json::Value>(Method::POST, &path, &[], &json!({}))
        })?;
        Ok(())
    }

    /// Sends `message`, then moves it out of the sender's Sent folder.
    pub fn send_and_trash_message(&self, message: &Message) -> Result<String> {
        let id = self.send_message(message)?;
        self.trash_message(&id)?;
        Ok(id)
    }
}
