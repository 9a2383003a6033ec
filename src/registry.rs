//! Shared daemon state.
//!
//! Built once at startup and handed to every VisionLoop and the ConfigServer
//! as `Arc<Registry>`. Pipeline slots and per-camera slot selection sit behind
//! one lock each; readers always get a complete snapshot.

use std::sync::{Mutex, MutexGuard};

use crate::config::ServerConfig;
use crate::pipeline::{ConfigError, PipelineConfig, PipelineField};

pub const PIPELINE_SLOTS: usize = 10;

pub struct Registry {
    camera_count: usize,
    hostname: String,
    server_config: ServerConfig,
    pipelines: Mutex<Vec<PipelineConfig>>,
    active: Mutex<Vec<usize>>,
}

// A panic while holding a guard cannot leave a slot half-written: every
// mutation validates a copy before storing it.
fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Registry {
    pub fn new(camera_count: usize, hostname: String, server_config: ServerConfig) -> Self {
        Self {
            camera_count,
            hostname,
            server_config,
            pipelines: Mutex::new(vec![PipelineConfig::default(); PIPELINE_SLOTS]),
            active: Mutex::new(vec![0; camera_count]),
        }
    }

    pub fn camera_count(&self) -> usize {
        self.camera_count
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn server_config(&self) -> &ServerConfig {
        &self.server_config
    }

    /// Snapshot of one slot.
    pub fn pipeline(&self, slot: usize) -> Result<PipelineConfig, ConfigError> {
        relock(&self.pipelines)
            .get(slot)
            .cloned()
            .ok_or(ConfigError::UnknownSlot(slot))
    }

    pub fn pipeline_field(&self, slot: usize, field: PipelineField) -> Result<String, ConfigError> {
        relock(&self.pipelines)
            .get(slot)
            .map(|cfg| cfg.get(field))
            .ok_or(ConfigError::UnknownSlot(slot))
    }

    /// Apply `edit` to a copy of the slot and store it only if it validates.
    pub fn update_pipeline<F>(&self, slot: usize, edit: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut PipelineConfig) -> Result<(), ConfigError>,
    {
        let mut pipelines = relock(&self.pipelines);
        let current = pipelines.get_mut(slot).ok_or(ConfigError::UnknownSlot(slot))?;
        let mut next = current.clone();
        edit(&mut next)?;
        next.validate()?;
        *current = next;
        Ok(())
    }

    pub fn set_field(&self, slot: usize, field: PipelineField, value: &str) -> Result<(), ConfigError> {
        self.update_pipeline(slot, |cfg| cfg.set(field, value))?;
        log::info!("pipeline {}: {} = {}", slot, field, value);
        Ok(())
    }

    pub fn replace_pipeline(&self, slot: usize, config: PipelineConfig) -> Result<(), ConfigError> {
        self.update_pipeline(slot, move |cfg| {
            *cfg = config;
            Ok(())
        })
    }

    /// Slot currently read by `camera`.
    pub fn active_slot(&self, camera: usize) -> Result<usize, ConfigError> {
        relock(&self.active)
            .get(camera)
            .copied()
            .ok_or(ConfigError::UnknownCamera(camera))
    }

    pub fn select_pipeline(&self, camera: usize, slot: usize) -> Result<(), ConfigError> {
        if slot >= PIPELINE_SLOTS {
            return Err(ConfigError::UnknownSlot(slot));
        }
        let mut active = relock(&self.active);
        let entry = active.get_mut(camera).ok_or(ConfigError::UnknownCamera(camera))?;
        *entry = slot;
        log::info!("camera{}: using pipeline {}", camera, slot);
        Ok(())
    }

    /// The config `camera` should process its next frame with.
    pub fn active_pipeline(&self, camera: usize) -> Result<PipelineConfig, ConfigError> {
        let slot = self.active_slot(camera)?;
        self.pipeline(slot)
    }
}
