//! Stream registry implementation
//!
//! The registry owns every live [`PublishStream`] and the viewers attached
//! to each path, and routes published frames to them. It is owned by one
//! reactor thread and shared between connections as a [`SharedRegistry`];
//! all mutation happens through `&mut self`, so a frame is cached and fanned
//! out in one step and a joining viewer can never miss or duplicate one.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::config::RegistryConfig;
use super::entry::PublishStream;
use super::error::RegistryError;
use super::player::PlayStream;
use super::sink::{RelayFrame, RelayListener};
use crate::amf::AmfValue;
use crate::media::{Frame, GopCache};
use crate::stats::StreamSnapshot;

/// Registry handle shared by the connections of one reactor
pub type SharedRegistry = Rc<RefCell<StreamRegistry>>;

/// Central registry for publish paths and their viewers
#[derive(Default)]
pub struct StreamRegistry {
    config: RegistryConfig,
    publishers: HashMap<String, PublishStream>,
    /// Viewers per path, in registration order
    players: HashMap<String, Vec<PlayStream>>,
    listener: Option<Box<dyn RelayListener>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Wrap into a handle for sessions
    pub fn into_shared(self) -> SharedRegistry {
        Rc::new(RefCell::new(self))
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Install the observer for all paths
    pub fn set_listener(&mut self, listener: Box<dyn RelayListener>) {
        self.listener = Some(listener);
    }

    /// Register the publisher of a path
    pub fn add_publish(&mut self, mut stream: PublishStream) -> Result<(), RegistryError> {
        if self.publishers.contains_key(&stream.path) {
            return Err(RegistryError::AlreadyPublishing(stream.path));
        }

        let gop = self
            .config
            .gop_cache
            .then(|| GopCache::with_max_size(self.config.gop_max_bytes));
        stream.set_gop_cache(gop);

        tracing::info!(
            path = %stream.path,
            session_id = stream.session_id,
            "Publisher registered"
        );
        self.publishers.insert(stream.path.clone(), stream);
        Ok(())
    }

    /// The publisher is set up; start every viewer waiting on the path
    ///
    /// Returns how many viewers started.
    pub fn publish_ready(&mut self, path: &str) -> Result<usize, RegistryError> {
        let publisher = self
            .publishers
            .get(path)
            .ok_or_else(|| RegistryError::StreamNotFound(path.to_string()))?;

        let mut started = 0;
        if let Some(players) = self.players.get_mut(path) {
            for player in players.iter_mut().filter(|p| p.is_idle()) {
                bootstrap(publisher, player);
                started += 1;
            }
        }

        if let Some(listener) = self.listener.as_mut() {
            listener.on_publish_ready(path);
        }

        tracing::debug!(path = %path, viewers = started, "Publish ready");
        Ok(started)
    }

    /// Record a published frame and fan it out to playing viewers
    pub fn publish_frame(&mut self, path: &str, frame: Frame) -> Result<(), RegistryError> {
        let publisher = self
            .publishers
            .get_mut(path)
            .ok_or_else(|| RegistryError::StreamNotFound(path.to_string()))?;

        publisher.ingest(&frame);

        if let Some(players) = self.players.get_mut(path) {
            for player in players.iter_mut().filter(|p| p.is_playing()) {
                player.deliver(&frame);
            }
        }

        if let Some(listener) = self.listener.as_mut() {
            listener.on_frame(&RelayFrame::new(path, &frame));
        }

        Ok(())
    }

    /// Merge `@setDataFrame` properties into the stream info
    pub fn apply_metadata(&mut self, path: &str, data: &AmfValue) -> Result<(), RegistryError> {
        let publisher = self
            .publishers
            .get_mut(path)
            .ok_or_else(|| RegistryError::StreamNotFound(path.to_string()))?;
        publisher.info.apply_metadata(data);
        Ok(())
    }

    /// Deregister a publisher, closing every viewer of the path
    pub fn remove_publish(
        &mut self,
        path: &str,
        session_id: u64,
    ) -> Result<PublishStream, RegistryError> {
        match self.publishers.get(path) {
            None => return Err(RegistryError::StreamNotFound(path.to_string())),
            Some(p) if p.session_id != session_id => {
                return Err(RegistryError::PublisherMismatch {
                    path: path.to_string(),
                    expected: p.session_id,
                });
            }
            Some(_) => {}
        }

        let viewers = self.players.remove(path).unwrap_or_default();
        for mut player in viewers {
            player.close();
        }

        if let Some(listener) = self.listener.as_mut() {
            listener.on_close(path);
        }

        let stream = self
            .publishers
            .remove(path)
            .ok_or_else(|| RegistryError::StreamNotFound(path.to_string()))?;

        tracing::info!(path = %path, session_id = session_id, "Publisher removed");
        Ok(stream)
    }

    /// Attach a viewer; it starts at once if the path is live
    ///
    /// Returns true if playback started.
    pub fn add_player(&mut self, player: PlayStream) -> bool {
        let path = player.path.clone();
        let session_id = player.session_id;
        self.players.entry(path.clone()).or_default().push(player);

        tracing::info!(path = %path, session_id = session_id, "Viewer registered");
        self.start_play(&path, session_id)
    }

    /// Send the cached state to an idle viewer and mark it playing
    ///
    /// Returns false if the path is not live or the viewer is unknown.
    pub fn start_play(&mut self, path: &str, session_id: u64) -> bool {
        let Some(publisher) = self.publishers.get(path) else {
            return false;
        };
        let Some(player) = self
            .players
            .get_mut(path)
            .and_then(|players| players.iter_mut().find(|p| p.session_id == session_id))
        else {
            return false;
        };

        if player.is_idle() {
            bootstrap(publisher, player);
        }
        true
    }

    /// Detach a viewer; the path's caches are left alone
    pub fn remove_player(&mut self, path: &str, session_id: u64) -> Option<PlayStream> {
        let players = self.players.get_mut(path)?;
        let index = players.iter().position(|p| p.session_id == session_id)?;
        let player = players.remove(index);

        if players.is_empty() {
            self.players.remove(path);
        }

        tracing::info!(path = %path, session_id = session_id, "Viewer removed");
        Some(player)
    }

    pub fn set_receive_audio(&mut self, path: &str, session_id: u64, enabled: bool) {
        if let Some(player) = self.player_mut(path, session_id) {
            player.receive_audio = enabled;
        }
    }

    pub fn set_receive_video(&mut self, path: &str, session_id: u64, enabled: bool) {
        if let Some(player) = self.player_mut(path, session_id) {
            player.receive_video = enabled;
        }
    }

    fn player_mut(&mut self, path: &str, session_id: u64) -> Option<&mut PlayStream> {
        self.players
            .get_mut(path)?
            .iter_mut()
            .find(|p| p.session_id == session_id)
    }

    pub fn publisher(&self, path: &str) -> Option<&PublishStream> {
        self.publishers.get(path)
    }

    pub fn is_live(&self, path: &str) -> bool {
        self.publishers.contains_key(path)
    }

    pub fn players(&self, path: &str) -> &[PlayStream] {
        self.players.get(path).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn player_count(&self, path: &str) -> usize {
        self.players(path).len()
    }

    /// Number of live paths
    pub fn stream_count(&self) -> usize {
        self.publishers.len()
    }

    /// Introspection snapshot of every live path, sorted by path
    pub fn snapshots(&self) -> Vec<StreamSnapshot> {
        let mut snapshots: Vec<StreamSnapshot> = self
            .publishers
            .values()
            .map(|p| StreamSnapshot::new(p, self.player_count(&p.path)))
            .collect();
        snapshots.sort_by(|a, b| a.path.cmp(&b.path));
        snapshots
    }
}

/// Catch a viewer up: metadata, AVC header, AAC header, GOP, then live
fn bootstrap(publisher: &PublishStream, player: &mut PlayStream) {
    let mut sent = 0;
    for frame in publisher.bootstrap_frames(player.gop_enabled) {
        player.deliver(frame);
        sent += 1;
    }
    player.mark_playing();

    tracing::info!(
        path = %player.path,
        session_id = player.session_id,
        catchup_frames = sent,
        "Viewer playing"
    );
}
