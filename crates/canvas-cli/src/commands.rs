//! Command-line surface and its execution against a [`Tree`].
//!
//! Every command resolves to exactly one [`Envelope`]; library errors are
//! mapped through [`Envelope::from_error`] and never escape as `Err`.

use crate::response::Envelope;
use anyhow::{Context as _, Result};
use canvas_tree::{
    Actor, Layer, LayerId, LayerKind, LayerPatch, LayerSpec, LogStore, StoreBackend, Tree,
    TreeConfig, Workspace,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "canvas-tree")]
#[command(author, version, about = "Canvas tree/layer bitmap index")]
pub struct Cli {
    /// JSON tree configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log-store file; overrides the configured backend
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(flatten)]
    pub actor: ActorArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Caller identity used for layer lock checks.
#[derive(Args, Debug, Clone, Default)]
pub struct ActorArgs {
    /// Act as this lock holder
    #[arg(long, global = true, conflicts_with = "admin")]
    pub holder: Option<String>,

    /// Act with the administrative override
    #[arg(long, global = true)]
    pub admin: bool,
}

impl ActorArgs {
    pub fn actor(&self) -> Actor {
        match (&self.holder, self.admin) {
            (_, true) => Actor::Admin,
            (Some(holder), false) => Actor::holder(holder.clone()),
            (None, false) => Actor::Anonymous,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Whole-tree views
    Tree {
        #[command(subcommand)]
        command: TreeCommands,
    },
    /// Path structure and propagation
    Paths {
        #[command(subcommand)]
        command: PathCommands,
    },
    /// Layer records, locks and cross-layer operations
    Layers {
        #[command(subcommand)]
        command: LayerCommands,
    },
    /// Document queries
    Docs {
        #[command(subcommand)]
        command: DocCommands,
    },
    /// Backing store maintenance
    Store {
        #[command(subcommand)]
        command: StoreCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum TreeCommands {
    /// Nested view of every path with its layers
    Show,
    /// Sorted list of every path
    Paths,
}

#[derive(Args, Debug)]
pub struct RelocateArgs {
    pub from: String,
    pub to: String,
    #[arg(short, long)]
    pub recursive: bool,
}

#[derive(Subcommand, Debug)]
pub enum PathCommands {
    /// Insert a path, creating missing ancestors
    Insert {
        path: String,
        /// Fail on missing ancestors instead of creating them
        #[arg(long)]
        no_auto_create: bool,
        /// Opaque JSON metadata stored on the node
        #[arg(long)]
        data: Option<String>,
    },
    Move(RelocateArgs),
    /// Alias a path: the copy binds the same layers
    Copy(RelocateArgs),
    Remove {
        path: String,
        #[arg(short, long)]
        recursive: bool,
    },
    MergeUp { path: String },
    MergeDown { path: String },
    SubtractUp { path: String },
    SubtractDown { path: String },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum KindArg {
    Context,
    Feature,
    Label,
    Canvas,
    Workspace,
}

impl From<KindArg> for LayerKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Context => LayerKind::Context,
            KindArg::Feature => LayerKind::Feature,
            KindArg::Label => LayerKind::Label,
            KindArg::Canvas => LayerKind::Canvas,
            KindArg::Workspace => LayerKind::Workspace,
        }
    }
}

#[derive(Args, Debug)]
pub struct CrossLayerArgs {
    /// Source layer id
    pub layer: String,
    /// Target layer ids
    #[arg(required = true)]
    pub targets: Vec<String>,
}

#[derive(Args, Debug)]
pub struct DocumentArgs {
    pub layer: String,
    #[arg(required = true)]
    pub ids: Vec<u64>,
}

#[derive(Subcommand, Debug)]
pub enum LayerCommands {
    /// All layers, or only those bound at a path
    List {
        #[arg(long)]
        path: Option<String>,
    },
    /// Look a layer up by id, or by name with --name
    Get {
        layer: String,
        #[arg(long)]
        name: bool,
    },
    Create {
        name: String,
        #[arg(long, value_enum, default_value = "context")]
        kind: KindArg,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        color: Option<String>,
        /// Bind the new layer at this path
        #[arg(long)]
        bind: Option<String>,
    },
    /// Rename and/or update presentation metadata
    Rename {
        layer: String,
        name: Option<String>,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },
    /// Lock for the holder given with --holder
    Lock { layer: String },
    Unlock { layer: String },
    /// Detach from every path and destroy the record
    Delete { layer: String },
    Merge(CrossLayerArgs),
    Subtract(CrossLayerArgs),
    AddDocs(DocumentArgs),
    RemoveDocs(DocumentArgs),
    Bind { path: String, layer: String },
    Detach { path: String, layer: String },
}

#[derive(Subcommand, Debug)]
pub enum DocCommands {
    /// Document ids at a path, filtered by feature layers
    Find {
        path: String,
        #[arg(short, long = "feature")]
        features: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum StoreCommands {
    /// Rewrite the log with one frame per live key
    Compact,
}

// ============================================================================
// Configuration
// ============================================================================

/// Read the JSON config (defaults when absent) and apply `--store`.
pub fn load_config(config: Option<&Path>, store: Option<&Path>) -> Result<TreeConfig> {
    let mut tree_config = match config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("failed to parse config {}", path.display()))?
        }
        None => TreeConfig::default(),
    };
    if let Some(path) = store {
        tree_config.store.backend = StoreBackend::Log {
            path: path.to_path_buf(),
        };
    }
    Ok(tree_config)
}

// ============================================================================
// Execution
// ============================================================================

/// Load configuration, open the store and run one command.
pub fn run(cli: &Cli) -> Envelope {
    let config = match load_config(cli.config.as_deref(), cli.store.as_deref()) {
        Ok(config) => config,
        Err(err) => return Envelope::bad_request(format!("{err:#}")),
    };

    tracing::debug!(backend = ?config.store.backend, "loaded configuration");

    if let Commands::Store {
        command: StoreCommands::Compact,
    } = &cli.command
    {
        return compact(&config);
    }

    match Tree::from_config(config) {
        Ok(tree) => execute(&Arc::new(tree), &cli.command, &cli.actor.actor()),
        Err(err) => Envelope::from_error(&err),
    }
}

fn compact(config: &TreeConfig) -> Envelope {
    let StoreBackend::Log { path } = &config.store.backend else {
        return Envelope::bad_request("the memory backend has nothing to compact");
    };
    let result = LogStore::open(path, &config.store).and_then(|store| {
        store.compact()?;
        Ok(store.len())
    });
    match result {
        Ok(keys) => Envelope::success(
            json!({ "path": path, "keys": keys }),
            "Store compacted",
        ),
        Err(err) => Envelope::from_error(&canvas_tree::Error::from(err)),
    }
}

/// Run one command against an open tree.
pub fn execute(tree: &Arc<Tree>, command: &Commands, actor: &Actor) -> Envelope {
    let result = match command {
        Commands::Tree { command } => tree_command(tree, command),
        Commands::Paths { command } => path_command(tree, command, actor),
        Commands::Layers { command } => layer_command(tree, command, actor),
        Commands::Docs { command } => doc_command(tree, command),
        Commands::Store { .. } => Ok(Envelope::bad_request(
            "store commands do not run against an open tree",
        )),
    };
    result.unwrap_or_else(|err| Envelope::from_error(&err))
}

type CommandResult = canvas_tree::Result<Envelope>;

fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn summary(layer: &Layer) -> Value {
    to_json(&layer.summary())
}

fn tree_command(tree: &Tree, command: &TreeCommands) -> CommandResult {
    match command {
        TreeCommands::Show => {
            let view = tree.snapshot()?;
            let count = view.node_count();
            Ok(Envelope::found(to_json(&view), Some(count)))
        }
        TreeCommands::Paths => {
            let paths = tree.paths()?;
            let count = paths.len();
            Ok(Envelope::found(to_json(&paths), Some(count)))
        }
    }
}

fn path_command(tree: &Tree, command: &PathCommands, actor: &Actor) -> CommandResult {
    match command {
        PathCommands::Insert {
            path,
            no_auto_create,
            data,
        } => {
            let data = match data {
                Some(text) => match serde_json::from_str(text) {
                    Ok(value) => Some(value),
                    Err(err) => {
                        return Ok(Envelope::bad_request(format!("invalid --data JSON: {err}")))
                    }
                },
                None => None,
            };
            let auto_create = tree.config().auto_create_layers && !no_auto_create;
            let node = tree.insert_path(path, data, auto_create)?;
            Ok(Envelope::created(to_json(&node)))
        }
        PathCommands::Move(args) => {
            let moved = tree.move_path(&args.from, &args.to, args.recursive)?;
            Ok(Envelope::updated(json!({ "from": args.from, "to": args.to, "nodes": moved })))
        }
        PathCommands::Copy(args) => {
            let copied = tree.copy_path(&args.from, &args.to, args.recursive)?;
            Ok(Envelope::created(json!({ "from": args.from, "to": args.to, "nodes": copied })))
        }
        PathCommands::Remove { path, recursive } => {
            let removed = tree.remove_path(path, *recursive)?;
            Ok(Envelope::deleted(json!({ "path": path, "nodes": removed })))
        }
        PathCommands::MergeUp { path } => Ok(Envelope::from_report(tree.merge_up(path, actor)?)),
        PathCommands::MergeDown { path } => {
            Ok(Envelope::from_report(tree.merge_down(path, actor)?))
        }
        PathCommands::SubtractUp { path } => {
            Ok(Envelope::from_report(tree.subtract_up(path, actor)?))
        }
        PathCommands::SubtractDown { path } => {
            Ok(Envelope::from_report(tree.subtract_down(path, actor)?))
        }
    }
}

fn layer_command(tree: &Tree, command: &LayerCommands, actor: &Actor) -> CommandResult {
    match command {
        LayerCommands::List { path } => {
            let layers = match path {
                Some(path) => tree.layers_at(path)?,
                None => tree.list_all_layers()?,
            };
            let summaries: Vec<Value> = layers.iter().map(summary).collect();
            let count = summaries.len();
            Ok(Envelope::found(Value::Array(summaries), Some(count)))
        }
        LayerCommands::Get { layer, name } => {
            let found = if *name {
                tree.get_layer(layer)?
            } else {
                tree.get_layer_by_id(&LayerId::from(layer.as_str()))?
            };
            match found {
                Some(layer) => Ok(Envelope::found(summary(&layer), None)),
                None => Err(canvas_tree::Error::LayerNotFound(layer.clone())),
            }
        }
        LayerCommands::Create {
            name,
            kind,
            label,
            description,
            color,
            bind,
        } => {
            let spec = LayerSpec {
                name: name.clone(),
                kind: (*kind).into(),
                label: label.clone(),
                description: description.clone(),
                color: color.clone(),
            };
            let layer = tree.create_layer(spec)?;
            if let Some(path) = bind {
                tree.bind_layer(path, layer.id())?;
            }
            Ok(Envelope::created(summary(&layer)))
        }
        LayerCommands::Rename {
            layer,
            name,
            label,
            description,
            color,
        } => {
            let id = LayerId::from(layer.as_str());
            let patch = LayerPatch {
                name: name.clone(),
                label: label.clone(),
                description: description.clone(),
                color: color.clone(),
            };
            let current = tree.update_layer(&id, patch, actor)?;
            Ok(Envelope::updated(summary(&current)))
        }
        LayerCommands::Lock { layer } => {
            let holder = actor.holder_id().unwrap_or_default();
            let locked = tree.lock_layer(&LayerId::from(layer.as_str()), holder)?;
            Ok(Envelope::updated(summary(&locked)))
        }
        LayerCommands::Unlock { layer } => {
            let unlocked = tree.unlock_layer(&LayerId::from(layer.as_str()), actor)?;
            Ok(Envelope::updated(summary(&unlocked)))
        }
        LayerCommands::Delete { layer } => {
            let id = LayerId::from(layer.as_str());
            let detached = tree.delete_layer(&id, actor)?;
            Ok(Envelope::deleted(json!({ "id": id, "detached": detached })))
        }
        LayerCommands::Merge(args) => {
            let (source, targets) = cross_layer_ids(args);
            Ok(Envelope::from_report(tree.merge_layer(&source, &targets, actor)?))
        }
        LayerCommands::Subtract(args) => {
            let (source, targets) = cross_layer_ids(args);
            Ok(Envelope::from_report(tree.subtract_layer(&source, &targets, actor)?))
        }
        LayerCommands::AddDocs(args) => {
            let layer = tree.add_documents(
                &LayerId::from(args.layer.as_str()),
                args.ids.iter().copied(),
                actor,
            )?;
            Ok(Envelope::updated(summary(&layer)))
        }
        LayerCommands::RemoveDocs(args) => {
            let layer = tree.remove_documents(
                &LayerId::from(args.layer.as_str()),
                args.ids.iter().copied(),
                actor,
            )?;
            Ok(Envelope::updated(summary(&layer)))
        }
        LayerCommands::Bind { path, layer } => {
            let node = tree.bind_layer(path, &LayerId::from(layer.as_str()))?;
            Ok(Envelope::updated(to_json(&node)))
        }
        LayerCommands::Detach { path, layer } => {
            let node = tree.detach_layer(path, &LayerId::from(layer.as_str()))?;
            Ok(Envelope::updated(to_json(&node)))
        }
    }
}

fn cross_layer_ids(args: &CrossLayerArgs) -> (LayerId, Vec<LayerId>) {
    let targets = args
        .targets
        .iter()
        .map(|t| LayerId::from(t.as_str()))
        .collect();
    (LayerId::from(args.layer.as_str()), targets)
}

fn doc_command(tree: &Arc<Tree>, command: &DocCommands) -> CommandResult {
    match command {
        DocCommands::Find { path, features } => {
            let workspace = Workspace::new("cli", "cli", Arc::clone(tree));
            let ids: Vec<u64> = workspace.find_documents(path, features)?.iter().collect();
            let count = ids.len();
            Ok(Envelope::found(to_json(&ids), Some(count)))
        }
    }
}
