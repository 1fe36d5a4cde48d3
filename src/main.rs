use anyhow::{Context, Result};
use clap::Parser;
use gapi_helper::{
    auth::{EnvTokenSource, TokenSource},
    commands::{self, Config, mail::Outgoing},
    drive::Role,
    runtime::RealRuntime,
};
use std::path::PathBuf;
use std::sync::Arc;

/// gapi - Google Drive, Sheets and Gmail from the command line
///
/// Authenticates with a service-account key file. The access token itself is
/// read from the GAPI_ACCESS_TOKEN environment variable.
///
/// Examples:
///   gapi drive list FOLDER_ID
///   gapi sheets download SPREADSHEET_ID "Tab name" out.csv
///   gapi mail send --from me@example.com --to you@example.com --subject Hi --body Hello
#[derive(Parser, Debug)]
#[command(author, version = env!("GAPI_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Service-account JSON key file
    #[arg(
        long = "credentials",
        short = 'c',
        env = "GAPI_CREDENTIALS",
        value_name = "PATH",
        global = true
    )]
    pub credentials: Option<PathBuf>,

    /// Google API URL (overrides the per-service defaults)
    #[arg(long = "api-url", value_name = "URL", global = true)]
    pub api_url: Option<String>,

    /// Seconds to wait before the first retry of a failed call
    #[arg(long = "retry-delay", value_name = "SECONDS", global = true)]
    pub retry_delay: Option<f64>,

    /// Act on behalf of this user (domain-wide delegation)
    #[arg(long = "user", short = 'u', value_name = "EMAIL", global = true)]
    pub user: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Manage files on Google Drive
    #[command(subcommand)]
    Drive(DriveCommands),

    /// Read and write Google Sheets
    #[command(subcommand)]
    Sheets(SheetsCommands),

    /// Send email through Gmail
    #[command(subcommand)]
    Mail(MailCommands),
}

#[derive(clap::Subcommand, Debug)]
enum DriveCommands {
    /// List the files of a folder
    List {
        #[arg(value_name = "FOLDER_ID")]
        folder: String,
    },

    /// Upload a local file into a folder
    Upload {
        #[arg(value_name = "FOLDER_ID")]
        folder: String,

        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// MIME type of the uploaded content
        #[arg(long, default_value = "application/octet-stream")]
        mime: String,

        /// Add a revision to a file of the same name instead of a sibling copy
        #[arg(long)]
        update: bool,
    },

    /// Download a file's content
    Download {
        #[arg(value_name = "FILE_ID")]
        file: String,

        #[arg(value_name = "DEST")]
        dest: PathBuf,
    },

    /// Share a file with someone (role "owner" transfers ownership)
    Share {
        #[arg(value_name = "FILE_ID")]
        file: String,

        #[arg(value_name = "EMAIL")]
        email: String,

        /// reader, commenter, writer or owner
        #[arg(long, default_value = "reader")]
        role: Role,

        /// Send a notification email
        #[arg(long)]
        notify: bool,
    },

    /// Delete a file
    Delete {
        #[arg(value_name = "FILE_ID")]
        file: String,
    },
}

#[derive(clap::Subcommand, Debug)]
enum SheetsCommands {
    /// List the tabs of a spreadsheet
    Tabs {
        #[arg(value_name = "SPREADSHEET_ID")]
        spreadsheet: String,

        /// Directory caching spreadsheet metadata
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,
    },

    /// Save one tab as CSV
    Download {
        #[arg(value_name = "SPREADSHEET_ID")]
        spreadsheet: String,

        #[arg(value_name = "TAB")]
        tab: String,

        #[arg(value_name = "DEST")]
        dest: PathBuf,

        /// Directory caching spreadsheet metadata
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,
    },

    /// Append the rows of a CSV file to a tab
    Append {
        #[arg(value_name = "SPREADSHEET_ID")]
        spreadsheet: String,

        #[arg(value_name = "TAB")]
        tab: String,

        #[arg(value_name = "CSV")]
        source: PathBuf,

        /// Range whose table the rows are appended to
        #[arg(long, default_value = "A1")]
        range: String,

        /// Log what would be written without writing it
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(clap::Subcommand, Debug)]
enum MailCommands {
    /// Send a plain-text email, optionally with an attachment
    Send {
        #[arg(long, value_name = "EMAIL")]
        from: String,

        #[arg(long, value_name = "EMAIL")]
        to: String,

        #[arg(long)]
        subject: String,

        #[arg(long)]
        body: String,

        #[arg(long, value_name = "EMAIL")]
        cc: Vec<String>,

        #[arg(long, value_name = "EMAIL")]
        reply_to: Option<String>,

        /// File to attach
        #[arg(long, value_name = "PATH")]
        attach: Option<PathBuf>,

        /// MIME type of the attachment when its extension is not recognised
        #[arg(long, value_name = "MIME", requires = "attach")]
        attach_type: Option<String>,

        /// Send to this address instead, without CC
        #[arg(long, value_name = "EMAIL")]
        test_recipient: Option<String>,

        /// Remove the message from the Sent folder afterwards
        #[arg(long)]
        trash: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = RealRuntime;

    let credentials = cli
        .credentials
        .context("No credentials file given (use --credentials or GAPI_CREDENTIALS)")?;
    let tokens: Arc<dyn TokenSource> = Arc::new(EnvTokenSource::new(runtime));
    let config = Config::new(runtime, tokens, credentials, cli.api_url, cli.retry_delay)?;
    let user = cli.user.as_deref();

    match cli.command {
        Commands::Drive(command) => match command {
            DriveCommands::List { folder } => commands::drive::list(config, &folder, user)?,
            DriveCommands::Upload {
                folder,
                path,
                mime,
                update,
            } => commands::drive::upload(config, &folder, &path, &mime, update, user)?,
            DriveCommands::Download { file, dest } => {
                commands::drive::download(config, &file, &dest, user)?
            }
            DriveCommands::Share {
                file,
                email,
                role,
                notify,
            } => commands::drive::share(config, &file, &email, role, notify, user)?,
            DriveCommands::Delete { file } => commands::drive::delete(config, &file, user)?,
        },
        Commands::Sheets(command) => match command {
            SheetsCommands::Tabs {
                spreadsheet,
                cache_dir,
            } => commands::sheets::tabs(config, &spreadsheet, cache_dir.as_deref())?,
            SheetsCommands::Download {
                spreadsheet,
                tab,
                dest,
                cache_dir,
            } => commands::sheets::download(config, &spreadsheet, &tab, &dest, cache_dir.as_deref())?,
            SheetsCommands::Append {
                spreadsheet,
                tab,
                source,
                range,
                dry_run,
            } => commands::sheets::append(config, &spreadsheet, &tab, &range, &source, dry_run)?,
        },
        Commands::Mail(MailCommands::Send {
            from,
            to,
            subject,
            body,
            cc,
            reply_to,
            attach,
            attach_type,
            test_recipient,
            trash,
        }) => {
            let outgoing = Outgoing {
                to: &to,
                subject: &subject,
                body: &body,
                reply_to: reply_to.as_deref(),
                cc: cc.iter().map(String::as_str).collect(),
                attachment: attach.as_deref(),
                attachment_type: attach_type.as_deref(),
            };
            commands::mail::send(config, &from, &outgoing, test_recipient.as_deref(), trash)?
        }
    }
    Ok(())
}
