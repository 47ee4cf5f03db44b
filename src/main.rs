use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::watch,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use projectarc::{
    FormField, ImageError, ImageFile, Project, ProjectForm, ProjectId, ProjectStore, SqliteGateway,
    core::{codec::DEFAULT_MAX_SIZE_KB, store::wait_for_snapshot},
    ui,
};

/// How long a write command waits for the snapshot showing its change.
const SNAPSHOT_WAIT: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(name = "projectarc")]
#[command(about = "Create, edit and follow projects in a live-synced collection")]
struct Cli {
    /// Project database file
    #[arg(long, env = "PROJECTARC_DATABASE", default_value = "projects.db", global = true)]
    database: PathBuf,

    /// Target size of uploaded images in KB
    #[arg(long, env = "PROJECTARC_MAX_IMAGE_KB", default_value_t = DEFAULT_MAX_SIZE_KB, global = true)]
    max_image_kb: u32,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show all projects
    List {
        /// Print the projects as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a project
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: String,
        /// pending, active or complete
        #[arg(long)]
        status: Option<String>,
        /// Image to compress and attach
        #[arg(long, value_name = "PATH")]
        image: Option<PathBuf>,
    },
    /// Change fields of an existing project
    Edit {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long, value_name = "PATH")]
        image: Option<PathBuf>,
    },
    /// Remove a project
    Delete {
        id: String,
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Print the project list again every time it changes
    Watch,
}

type Store = ProjectStore<SqliteGateway>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Cli::parse();

    let default_filter = if args.verbose {
        "projectarc=debug"
    } else {
        "projectarc=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let gateway = SqliteGateway::open(&args.database)
        .await
        .with_context(|| format!("Failed to open {:?}", args.database))?;
    let store = ProjectStore::new(Arc::new(gateway));

    let mut changes = store.changes();
    store.mount();
    changes
        .changed()
        .await
        .context("Project subscription ended before the first snapshot")?;

    let result = run(&store, &mut changes, args.command, args.max_image_kb).await;

    store.unmount();
    store.gateway().close().await?;
    result
}

async fn run(
    store: &Store,
    changes: &mut watch::Receiver<u64>,
    command: Command,
    max_image_kb: u32,
) -> anyhow::Result<()> {
    match command {
        Command::List { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&store.projects())?);
            } else {
                print!("{}", ui::render_view(&store.view()));
            }
        }
        Command::Add {
            name,
            description,
            status,
            image,
        } => {
            store.open_create_form();
            let mut form = ProjectForm::new(Project::default()).with_max_image_kb(max_image_kb);
            form.set_field(FormField::Name, &name);
            form.set_field(FormField::Description, &description);
            if let Some(status) = &status {
                form.set_field(FormField::Status, status);
            }
            let project = submit(&mut form, image).await?;
            save(store, changes, project).await?;
        }
        Command::Edit {
            id,
            name,
            description,
            status,
            image,
        } => {
            let id = ProjectId::new(id);
            if !store.begin_edit(&id) {
                anyhow::bail!("No project with id {id}");
            }
            let project = store
                .editing_project()
                .with_context(|| format!("Project {id} disappeared while editing"))?;
            let mut form = ProjectForm::new(project).with_max_image_kb(max_image_kb);
            for (field, value) in [
                (FormField::Name, name),
                (FormField::Description, description),
                (FormField::Status, status),
            ] {
                if let Some(value) = value {
                    form.set_field(field, &value);
                }
            }
            let project = submit(&mut form, image).await?;
            save(store, changes, project).await?;
        }
        Command::Delete { id, yes } => {
            let id = ProjectId::new(id);
            let project = store
                .project(&id)
                .with_context(|| format!("No project with id {id}"))?;
            if !yes && !confirm(&format!("Delete project \"{}\"?", project.name)).await? {
                println!("Cancelled");
                return Ok(());
            }
            if let Err(e) = store.delete(&id).await {
                print!("{}", ui::render_view(&store.view()));
                return Err(e.into());
            }
            if !wait_for_snapshot(changes, SNAPSHOT_WAIT).await {
                tracing::debug!(id = %id, "No snapshot followed the delete");
            }
            print!("{}", ui::render_view(&store.view()));
        }
        Command::Watch => {
            print!("{}", ui::render_view(&store.view()));
            loop {
                tokio::select! {
                    changed = changes.changed() => {
                        changed.context("Project subscription ended")?;
                        println!();
                        print!("{}", ui::render_view(&store.view()));
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::debug!("Interrupted, stopping watch");
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Attaches the optional image and submits the form, printing it on failure.
async fn submit(form: &mut ProjectForm, image: Option<PathBuf>) -> anyhow::Result<Project> {
    if let Some(path) = image {
        let file = ImageFile::open(&path)
            .await
            .map_err(ImageError::ReadFailed)
            .with_context(|| format!("Cannot use {:?}", path))?;
        if let Err(e) = form.select_image(Some(file)) {
            print!("{}", ui::render_form(form));
            return Err(e.into());
        }
    }
    match form.submit().await {
        Ok(project) => Ok(project),
        Err(e) => {
            print!("{}", ui::render_form(form));
            Err(e.into())
        }
    }
}

async fn save(
    store: &Store,
    changes: &mut watch::Receiver<u64>,
    project: Project,
) -> anyhow::Result<()> {
    match store.save(project).await {
        Ok(id) => {
            if !wait_for_snapshot(changes, SNAPSHOT_WAIT).await {
                tracing::warn!(id = %id, "Saved project has not shown up yet");
            }
            let view = store.view();
            print!("{}", ui::render_view(&view));
            if let Some(project) = store.project(&id) {
                tracing::debug!(id = %id, name = %project.name, "Saved project is visible");
            }
            Ok(())
        }
        Err(e) => {
            print!("{}", ui::render_view(&store.view()));
            Err(e.into())
        }
    }
}

async fn confirm(question: &str) -> anyhow::Result<bool> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(format!("{question} [y/N] ").as_bytes()).await?;
    stdout.flush().await?;
    let mut answer = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut answer)
        .await?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
