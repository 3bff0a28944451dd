use clap::{Parser, Subcommand, ValueEnum};
use docstore::{
    parse_model, register_folders, Context, Document, DocumentStore, EntityRef, MoveRequest,
    StoreOptions, Update,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process;

/// docstore CLI: load a model and seed data into a memory store and run one command against it
#[derive(Parser)]
#[command(name = "docstore", version, about)]
struct Cli {
    /// Model definition (entityTypes / complexTypes / entitySets)
    #[arg(long)]
    model: PathBuf,

    /// Seed documents, a mapping of entity set to a list of documents
    #[arg(long)]
    data: Option<PathBuf>,

    /// Store options; falls back to DOCSTORE_* environment variables
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Find documents in an entity set
    Find {
        entity_set: String,
        /// Mongo-style query (JSON)
        #[arg(long, default_value = "{}")]
        query: String,
    },

    /// Count documents in an entity set
    Count {
        entity_set: String,
        #[arg(long, default_value = "{}")]
        query: String,
    },

    /// Insert a document
    Insert {
        entity_set: String,
        /// Field values (e.g. --field name=invoice)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Set fields on every matching document
    Update {
        entity_set: String,
        #[arg(long)]
        query: String,
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Remove matching documents
    Remove {
        entity_set: String,
        #[arg(long)]
        query: String,
    },

    /// Print the folder path of an entity
    Path { entity_set: String, id: String },

    /// Resolve a folder path to an entity
    Resolve {
        path: String,
        #[arg(long)]
        entity_set: Option<String>,
    },

    /// List the contents of a folder (the root by default)
    Ls {
        /// Folder shortid
        #[arg(long)]
        folder: Option<String>,
        #[arg(long)]
        recursive: bool,
    },

    /// Move an entity (with its subtree) to another folder
    Move {
        entity_set: String,
        id: String,
        /// Target folder shortid; the root when omitted
        #[arg(long)]
        target: Option<String>,
        /// Replace a same-named entity at the destination
        #[arg(long)]
        replace: bool,
    },

    /// Copy an entity to another folder
    Copy {
        entity_set: String,
        id: String,
        #[arg(long)]
        target: Option<String>,
        #[arg(long)]
        replace: bool,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

async fn open_store(cli: &Cli) -> Result<DocumentStore, Box<dyn std::error::Error>> {
    let options = match &cli.config {
        Some(path) => StoreOptions::from_yaml_str(&std::fs::read_to_string(path)?)?,
        None => StoreOptions::from_env()?,
    };
    let mut store = DocumentStore::memory(options);
    store.register_model(parse_model(&cli.model)?)?;
    register_folders(&mut store)?;
    store.init().await?;

    if let Some(path) = &cli.data {
        let seed: serde_yaml::Mapping = serde_yaml::from_str(&std::fs::read_to_string(path)?)?;
        let ctx = Context::new();
        let mut inserted = 0;
        for (entity_set, docs) in seed {
            let entity_set = entity_set
                .as_str()
                .ok_or("Seed data keys must be entity set names")?
                .to_string();
            let docs: Vec<Value> = serde_yaml::from_value(docs)?;
            let collection = store.collection(&entity_set)?;
            for doc in docs {
                collection.insert(Document::from_value(doc)?, &ctx).await?;
                inserted += 1;
            }
        }
        log::info!("seeded {inserted} documents from {}", path.display());
    }
    Ok(store)
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(&cli).await?;
    let ctx = Context::new();

    let output = match cli.command {
        Command::Find { entity_set, query } => {
            let docs = store
                .collection(&entity_set)?
                .find(serde_json::from_str(&query)?, &ctx)
                .await?;
            serde_json::to_value(docs)?
        }

        Command::Count { entity_set, query } => {
            let count = store
                .collection(&entity_set)?
                .count(serde_json::from_str(&query)?, &ctx)
                .await?;
            json!({ "count": count })
        }

        Command::Insert { entity_set, fields } => {
            let doc = Document::from_value(fields_to_value(&fields))?;
            let inserted = store.collection(&entity_set)?.insert(doc, &ctx).await?;
            inserted.into_value()
        }

        Command::Update {
            entity_set,
            query,
            fields,
        } => {
            let matched = store
                .collection(&entity_set)?
                .update(
                    serde_json::from_str(&query)?,
                    Update::set(fields_to_value(&fields))?,
                    &ctx,
                )
                .await?;
            json!({ "matched": matched })
        }

        Command::Remove { entity_set, query } => {
            store
                .collection(&entity_set)?
                .remove(serde_json::from_str(&query)?, &ctx)
                .await?;
            json!({ "ok": true })
        }

        Command::Path { entity_set, id } => {
            let entity = store
                .collection(&entity_set)?
                .find_one(json!({ "_id": id }), &ctx)
                .await?
                .ok_or_else(|| docstore::StoreError::NotFound {
                    entity_set: entity_set.clone(),
                    id: id.clone(),
                })?;
            let path = store
                .folders()
                .resolve_entity_path(&entity, &entity_set, &ctx)
                .await?;
            json!({ "path": path })
        }

        Command::Resolve { path, entity_set } => {
            let item = store
                .folders()
                .resolve_entity_from_path(&path, entity_set.as_deref(), &ctx)
                .await?;
            serde_json::to_value(item)?
        }

        Command::Ls { folder, recursive } => {
            let items = store
                .folders()
                .get_entities_in_folder(folder.as_deref(), recursive, &ctx)
                .await?;
            serde_json::to_value(items)?
        }

        Command::Move {
            entity_set,
            id,
            target,
            replace,
        } => move_or_copy(&store, entity_set, id, target, replace, false, &ctx).await?,

        Command::Copy {
            entity_set,
            id,
            target,
            replace,
        } => move_or_copy(&store, entity_set, id, target, replace, true, &ctx).await?,
    };

    print_output(&output, &cli.format)
}

async fn move_or_copy(
    store: &DocumentStore,
    entity_set: String,
    id: String,
    target: Option<String>,
    should_replace: bool,
    should_copy: bool,
    ctx: &Context,
) -> Result<Value, Box<dyn std::error::Error>> {
    let request = MoveRequest {
        source: EntityRef { entity_set, id },
        target,
        should_copy,
        should_replace,
    };
    let items = store.folders().move_entity(request, ctx).await?;
    Ok(serde_json::to_value(items)?)
}

fn print_output(value: &Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn fields_to_value(fields: &[(String, String)]) -> Value {
    let mut map = serde_json::Map::new();
    for (key, val) in fields {
        // Numbers, booleans, arrays and objects are taken as JSON; anything else is a string
        let json_val = serde_json::from_str(val).unwrap_or_else(|_| Value::String(val.clone()));
        map.insert(key.clone(), json_val);
    }
    Value::Object(map)
}
