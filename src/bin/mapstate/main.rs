use std::path::PathBuf;

use clap::{Parser as CliParser, Subcommand};
use log::info;
use mapstate::config::Config;
use mapstate::map::layer_tree::MapRoot;
use mapstate::remote;
use mapstate::state::StateStore;
use mapstate::state::actor::StateActor;
use mapstate::uri;
use tracing_subscriber::EnvFilter;

#[derive(clap::Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Prints the url of the default state of a layer tree.
  Encode {
    /// The layer tree as json.
    #[arg(short, long)]
    tree: PathBuf,

    /// A url to write the state into. Its other parameters are kept.
    #[arg(short, long, default_value = "")]
    url: String,

    /// Overrides the configured locale.
    #[arg(short, long)]
    locale: Option<String>,
  },
  /// Prints the state a url describes as json.
  Decode {
    #[arg(short, long)]
    url: String,

    /// Decodes over the defaults of this tree and reconciles with it.
    #[arg(short, long)]
    tree: Option<PathBuf>,
  },
  /// Prints the ids of the layers drawn on the map, one per line.
  Visible {
    #[arg(short, long)]
    tree: PathBuf,

    #[arg(short, long)]
    url: Option<String>,
  },
  /// Applies a url to a tree and saves the result as the tree's new defaults.
  WriteBack {
    #[arg(short, long)]
    tree: PathBuf,

    #[arg(short, long)]
    url: String,

    /// Where to write the tree. stdout is used if this is not provided.
    #[arg(short, long)]
    out: Option<PathBuf>,
  },
  /// Serves a state session over http on localhost.
  Serve {
    /// Falls back to the configured tree, or an empty one.
    #[arg(short, long)]
    tree: Option<PathBuf>,

    #[arg(short, long)]
    port: Option<u16>,
  },
}

/// A store initialized from `tree`, with `url` applied on top.
fn session(tree: &MapRoot, url: Option<&str>, locale: &str) -> StateStore {
  let mut store = StateStore::new(locale);
  store.initialize_from_tree(tree);
  if let Some(url) = url {
    uri::decode(url, &mut store);
    store.reconcile_with_tree(tree);
  }
  store
}

fn run(config: &Config, command: Command) -> anyhow::Result<()> {
  match command {
    Command::Encode { tree, url, locale } => {
      let tree = MapRoot::load(&tree)?;
      let store = session(&tree, None, locale.as_deref().unwrap_or(config.locale()));
      println!("{}", uri::encode(&store, &url, &config.uri));
    }
    Command::Decode { url, tree } => {
      let store = match tree {
        Some(path) => session(&MapRoot::load(&path)?, Some(&url), config.locale()),
        None => {
          let mut store = StateStore::new(config.locale());
          uri::decode(&url, &mut store);
          store
        }
      };
      println!("{}", serde_json::to_string_pretty(store.state())?);
    }
    Command::Visible { tree, url } => {
      let tree = MapRoot::load(&tree)?;
      let store = session(&tree, url.as_deref(), config.locale());
      for id in store.visible_layer_ids(&tree) {
        println!("{id}");
      }
    }
    Command::WriteBack { tree: path, url, out } => {
      let mut tree = MapRoot::load(&path)?;
      let store = session(&tree, Some(&url), config.locale());
      store.write_back_to_tree(&mut tree);
      match out {
        Some(out) => {
          tree.save(&out)?;
          info!("Wrote {}", out.display());
        }
        None => println!("{}", tree.to_json()?),
      }
    }
    Command::Serve { tree, port } => serve(config, tree, port)?,
  }
  Ok(())
}

fn serve(config: &Config, tree: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
  let tree = match tree.or_else(|| config.tree_path.clone()) {
    Some(path) => MapRoot::load(&path)?,
    None => MapRoot::default(),
  };
  let handle = StateActor::spawn(tree, config.locale(), config.uri);

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(remote::serve(handle, port.unwrap_or(config.port())))
}

/// `serve` logs through tracing, one-shot commands through `env_logger`. Either way the
/// logger has to be up before the config is read, which logs its own failures.
fn init_logging(command: &Command) {
  if matches!(command, Command::Serve { .. }) {
    tracing_subscriber::fmt()
      .with_target(false)
      .with_env_filter(EnvFilter::from_default_env())
      .compact()
      .init();
  } else {
    env_logger::init();
  }
}

fn main() -> anyhow::Result<()> {
  let args = Args::parse();
  init_logging(&args.command);
  let config = Config::new();
  run(&config, args.command)
}
