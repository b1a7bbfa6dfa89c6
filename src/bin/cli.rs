// Libro - Public-domain e-book reader
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use libro_core::api::CatalogQuery;
use libro_core::config::default_data_dir;
use libro_core::library::{RemoveOutcome, SaveOutcome};
use libro_core::{BookId, Libro, LibroConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "libro-cli")]
#[command(about = "Libro CLI - Desktop testing tool", long_about = None)]
struct Cli {
    /// Data directory (database and downloaded books)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON configuration file; overrides --data-dir
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// API base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the credentials
    SignIn {
        /// Email address
        #[arg(short, long)]
        email: String,
        /// Password
        #[arg(short, long)]
        password: String,
    },
    /// Register a new account
    SignUp {
        #[arg(short, long)]
        fullname: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    /// Sign out and apply the sign-out policy
    SignOut,
    /// Show session and library status
    Status,
    /// Search the catalog by title or author
    Search {
        filter: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Show one book's details
    Show { id: String },
    /// Save a book for offline reading
    Save { id: String },
    /// Remove a book from the library
    Remove { id: String },
    /// List saved books
    List,
    /// Print a saved book's text
    Read { id: String },
    /// Delete content files no bookmark refers to
    Prune,
}

fn load_config(cli: &Cli) -> Result<LibroConfig> {
    let mut config = match &cli.config {
        Some(path) => LibroConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => LibroConfig::with_data_dir(cli.data_dir.clone().unwrap_or_else(default_data_dir)),
    };
    if let Some(base_url) = &cli.base_url {
        config.client.base_url = base_url.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let libro = Libro::open(load_config(&cli)?)
        .await
        .context("opening libro data directory")?;

    let result = run(&libro, cli.command).await;
    libro.close().await;
    result
}

async fn run(libro: &Libro, command: Commands) -> Result<()> {
    match command {
        Commands::SignIn { email, password } => {
            libro
                .session()
                .sign_in(&email, &password)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("Signed in as {}", email);
        }
        Commands::SignUp {
            fullname,
            email,
            password,
        } => {
            libro
                .session()
                .sign_up(&fullname, &email, &password)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("Account created; sign in with {}", email);
        }
        Commands::SignOut => {
            libro.sign_out().await?;
            println!("Signed out");
        }
        Commands::Status => {
            let state = libro.session().state();
            let bookmarks = libro.library().list_bookmarks().await;
            println!("API:           {}", libro.session().base_url());
            println!("Authenticated: {}", state.authenticated);
            if let Some(at) = state.last_refreshed_at {
                println!("Refreshed at:  {}", at);
            }
            println!("Saved books:   {}", bookmarks.len());
            println!(
                "Content dir:   {}",
                libro.library().content_store().root().display()
            );
        }
        Commands::Search { filter, page } => {
            let mut query = CatalogQuery::page(page);
            if let Some(filter) = filter {
                query = query.with_filter(filter);
            }
            let results = libro.catalog().list_books(&query).await?;
            for book in &results.books {
                println!("{:>8}  {}  ({})", book.id, book.title, book.authors_display());
            }
            println!("Page {} of {}", results.page, results.total_pages);
        }
        Commands::Show { id } => {
            let book = libro.catalog().fetch_book(&BookId::new(id)).await?;
            println!("{} [{}]", book.title, book.id);
            println!("Authors: {}", book.authors_display());
            if let Some(description) = &book.description {
                println!("\n{}", description);
            }
            if let Some(downloads) = book.downloads {
                println!("\nDownloads: {}", downloads);
            }
            let saved = libro.library().is_bookmarked(&book.id).await;
            println!("Saved: {}", if saved { "yes" } else { "no" });
        }
        Commands::Save { id } => match libro.save_book(&BookId::new(id)).await? {
            SaveOutcome::AlreadySaved => println!("Already in your library"),
            SaveOutcome::Saved { bytes } => println!("Saved ({} bytes)", bytes),
            SaveOutcome::SavedWithoutContent { reason } => {
                println!("Saved, but not available offline: {}", reason)
            }
        },
        Commands::Remove { id } => match libro.library().remove_bookmark(&BookId::new(id)).await? {
            RemoveOutcome::NotBookmarked => println!("Not in your library"),
            RemoveOutcome::Removed => println!("Removed"),
            RemoveOutcome::RemovedContentRetained { reason } => {
                println!("Removed; content file kept: {}", reason)
            }
        },
        Commands::List => {
            let bookmarks = libro.library().list_bookmarks().await;
            if bookmarks.is_empty() {
                println!("Your library is empty");
            }
            for entry in bookmarks {
                println!("{:>8}  {}  ({})", entry.id, entry.title, entry.authors_display);
            }
        }
        Commands::Read { id } => {
            let view = libro.library().open_for_reading(&BookId::new(id)).await;
            if view.entry.is_none() {
                bail!("{} is not in your library", view.id);
            }
            println!("{}\n{}\n", view.title(), view.authors());
            println!("{}", view.content.text());
        }
        Commands::Prune => {
            let removed = libro.library().prune_orphaned_content().await?;
            println!("Removed {} orphaned file(s)", removed);
        }
    }
    Ok(())
}
