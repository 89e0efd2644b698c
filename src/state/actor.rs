use std::sync::mpsc::{self, Receiver, Sender};

use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

use super::{Field, StateStore, ViewState};
use crate::map::coordinates::LatLonBox;
use crate::map::layer_tree::MapRoot;
use crate::map::map_type::MapType;
use crate::uri::{self, UriOptions};

/// A request to the [`StateActor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum StateCommand {
  SetLayerEnabled {
    id: String,
    enabled: bool,
  },
  SelectSublayer {
    folder: String,
    id: String,
    #[serde(default)]
    force_one_selected: bool,
  },
  PromoteLayer {
    id: String,
  },
  DemoteSublayers {
    folder: String,
  },
  /// `None` removes the override.
  SetLayerOpacity {
    id: String,
    #[serde(default)]
    opacity: Option<u8>,
  },
  SetMapType {
    map_type: MapType,
  },
  SetViewport {
    viewport: LatLonBox,
  },
  SetFilterQuery {
    query: String,
  },
  /// Decodes `uri` into the state and reconciles it with the session tree.
  ApplyUri {
    uri: String,
  },
  /// Encodes the state into `uri`.
  EncodeUri {
    #[serde(default)]
    uri: String,
  },
  VisibleLayers,
  Snapshot,
  /// Replaces the session tree and resets the state to its defaults.
  LoadTree {
    tree: MapRoot,
  },
  /// Writes the state into the session tree and returns it.
  WriteBack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", content = "value", rename_all = "snake_case")]
pub enum StateReply {
  Done,
  Uri(String),
  LayerIds(Vec<String>),
  State(ViewState),
  Tree(MapRoot),
  Failed(String),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorError {
  #[error("The state actor has stopped.")]
  Stopped,
}

type Envelope = (StateCommand, oneshot::Sender<StateReply>);

/// Owns a [`StateStore`] and the tree of one session on a dedicated thread.
///
/// The store and its handlers are not `Send`, so they never leave that thread. Commands are
/// processed one at a time in the order they arrive.
pub struct StateActor {
  store: StateStore,
  tree: MapRoot,
  options: UriOptions,
  receiver: Receiver<Envelope>,
}

impl StateActor {
  /// Starts the actor with the defaults of `tree`. The thread ends once every
  /// [`StateHandle`] is dropped.
  #[must_use]
  pub fn spawn(tree: MapRoot, locale: impl Into<String>, options: UriOptions) -> StateHandle {
    let (sender, receiver) = mpsc::channel();
    let locale = locale.into();
    std::thread::spawn(move || {
      let mut store = StateStore::new(locale);
      store.subscribe_all(|store, field| {
        info!("{}: {}", field.event_name(), describe(store, field));
      });
      store.initialize_from_tree(&tree);
      Self {
        store,
        tree,
        options,
        receiver,
      }
      .run();
    });
    StateHandle { sender }
  }

  fn run(mut self) {
    while let Ok((command, reply)) = self.receiver.recv() {
      debug!("Handling {command:?}");
      let answer = self.handle(command);
      if reply.send(answer).is_err() {
        debug!("Requester went away before the reply.");
      }
    }
    debug!("All state handles dropped, stopping.");
  }

  fn handle(&mut self, command: StateCommand) -> StateReply {
    let store = &mut self.store;
    match command {
      StateCommand::SetLayerEnabled { id, enabled } => {
        store.set_layer_enabled(&id, enabled);
        StateReply::Done
      }
      StateCommand::SelectSublayer {
        folder,
        id,
        force_one_selected,
      } => done_or_failed(store.select_sublayer(&folder, &id, force_one_selected)),
      StateCommand::PromoteLayer { id } => done_or_failed(store.promote_layer(&id)),
      StateCommand::DemoteSublayers { folder } => done_or_failed(store.demote_sublayers(&folder)),
      StateCommand::SetLayerOpacity { id, opacity } => {
        store.set_layer_opacity(&id, opacity);
        StateReply::Done
      }
      StateCommand::SetMapType { map_type } => {
        store.set_map_type(map_type);
        StateReply::Done
      }
      StateCommand::SetViewport { viewport } => {
        store.set_viewport(viewport);
        StateReply::Done
      }
      StateCommand::SetFilterQuery { query } => {
        store.set_filter_query(query);
        StateReply::Done
      }
      StateCommand::ApplyUri { uri: url } => {
        uri::decode(&url, store);
        store.reconcile_with_tree(&self.tree);
        StateReply::Done
      }
      StateCommand::EncodeUri { uri: url } => {
        StateReply::Uri(uri::encode(store, &url, &self.options))
      }
      StateCommand::VisibleLayers => {
        StateReply::LayerIds(store.visible_layer_ids(&self.tree).into_iter().collect())
      }
      StateCommand::Snapshot => StateReply::State(store.state().clone()),
      StateCommand::LoadTree { tree } => match tree.validate() {
        Ok(()) => {
          store.initialize_from_tree(&tree);
          self.tree = tree;
          StateReply::Done
        }
        Err(e) => StateReply::Failed(e.to_string()),
      },
      StateCommand::WriteBack => {
        store.write_back_to_tree(&mut self.tree);
        StateReply::Tree(self.tree.clone())
      }
    }
  }
}

fn done_or_failed<E: std::fmt::Display>(result: Result<(), E>) -> StateReply {
  match result {
    Ok(()) => StateReply::Done,
    Err(e) => StateReply::Failed(e.to_string()),
  }
}

/// A short rendering of the current value of `field`.
fn describe(store: &StateStore, field: Field) -> String {
  match field {
    Field::EnabledLayerIds => store.enabled_layer_ids().iter().join(","),
    Field::PromotedLayerIds => store.promoted_layer_ids().iter().join(","),
    Field::LayerOpacities => store
      .layer_opacities()
      .iter()
      .map(|(id, o)| format!("{id}:{o}"))
      .join(","),
    Field::Viewport => store.viewport().to_string(),
    Field::MapType => store.map_type().to_string(),
    Field::BaseMapStyle => store.base_map_style().unwrap_or_default().to_owned(),
    Field::FilterQuery => store.filter_query().to_owned(),
    Field::Locale => store.locale().to_owned(),
  }
}

/// Cheap to clone sending side of a [`StateActor`].
#[derive(Debug, Clone)]
pub struct StateHandle {
  sender: Sender<Envelope>,
}

impl StateHandle {
  pub async fn request(&self, command: StateCommand) -> Result<StateReply, ActorError> {
    let (reply, answer) = oneshot::channel();
    self
      .sender
      .send((command, reply))
      .map_err(|_| ActorError::Stopped)?;
    answer.await.map_err(|_| ActorError::Stopped)
  }

  /// Like [`StateHandle::request`] for callers outside of an async runtime.
  pub fn request_blocking(&self, command: StateCommand) -> Result<StateReply, ActorError> {
    let (reply, answer) = oneshot::channel();
    self
      .sender
      .send((command, reply))
      .map_err(|_| ActorError::Stopped)?;
    answer.blocking_recv().map_err(|_| ActorError::Stopped)
  }
}
