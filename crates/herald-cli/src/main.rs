use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::{Parser, Subcommand};
use futures::StreamExt;

// D-Bus proxy for the heraldd daemon on the session bus.
#[zbus::proxy(
    interface = "org.herald.Identity1",
    default_service = "org.herald.Identity1",
    default_path = "/org/herald/Identity1"
)]
trait Herald {
    async fn recognize(&self, image: &str) -> zbus::Result<String>;
    async fn enroll(&self, name: &str, greeting: &str, images: Vec<String>)
        -> zbus::Result<String>;
    async fn remove_identity(&self, name: &str) -> zbus::Result<bool>;
    async fn reload(&self) -> zbus::Result<u32>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;

    #[zbus(signal)]
    fn dignitary_recognized(&self, name: String, message: String) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "herald", about = "Herald identity greeting CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll an identity from one or more images
    Enroll {
        /// Identity name (unique; re-enrolling replaces the record)
        name: String,
        /// Image files to enroll from
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Formal greeting override (e.g., "Dr. Manoj Goel, our Director")
        #[arg(short, long)]
        greeting: Option<String>,
    },
    /// Recognize faces in an image
    Recognize {
        /// Image file to recognize
        image: PathBuf,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove {
        /// Identity name to remove
        name: String,
    },
    /// Show daemon status
    Status,
    /// Re-read the enrollment store from disk
    Reload,
    /// Stream greeting dispatches as they happen
    Watch,
}

/// Exit code for a recognize run, per status.
///
/// 0 recognized, 2 no face, 3 unrecognized, 4 store empty; anything
/// unexpected falls through to the generic failure code.
fn recognize_exit_code(status: &str) -> i32 {
    match status {
        "recognized" => 0,
        "no_face" => 2,
        "unknown" => 3,
        "store_empty" => 4,
        _ => 1,
    }
}

fn read_image_b64(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read image {}", path.display()))?;
    Ok(BASE64.encode(bytes))
}

fn print_json(raw: &str) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => println!(
            "{}",
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| raw.to_string())
        ),
        Err(_) => println!("{raw}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    let proxy = HeraldProxy::new(&connection)
        .await
        .context("is heraldd running?")?;

    match cli.command {
        Commands::Enroll {
            name,
            images,
            greeting,
        } => {
            let payloads: Vec<String> = images
                .iter()
                .map(|p| read_image_b64(p))
                .collect::<Result<_>>()?;
            let reply = proxy
                .enroll(&name, greeting.as_deref().unwrap_or(""), payloads)
                .await?;
            print_json(&reply);

            let body: serde_json::Value = serde_json::from_str(&reply).unwrap_or_default();
            if body["success"] != true {
                std::process::exit(1);
            }
        }
        Commands::Recognize { image } => {
            let reply = proxy.recognize(&read_image_b64(&image)?).await?;
            print_json(&reply);

            let body: serde_json::Value = serde_json::from_str(&reply).unwrap_or_default();
            let status = body["status"].as_str().unwrap_or("");
            std::process::exit(recognize_exit_code(status));
        }
        Commands::List => {
            print_json(&proxy.list_identities().await?);
        }
        Commands::Remove { name } => {
            if proxy.remove_identity(&name).await? {
                println!("Removed: {name}");
            } else {
                println!("No such identity: {name}");
                std::process::exit(1);
            }
        }
        Commands::Status => {
            print_json(&proxy.status().await?);
        }
        Commands::Reload => {
            let count = proxy.reload().await?;
            println!("Store reloaded: {count} identities");
        }
        Commands::Watch => {
            let mut stream = proxy.receive_dignitary_recognized().await?;
            eprintln!("Watching for greetings (ctrl-c to stop)...");
            while let Some(signal) = stream.next().await {
                let args = signal.args()?;
                println!("{}: {}", args.name, args.message);
            }
        }
    }

    Ok(())
}
