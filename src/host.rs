//! Host-side registry of stream sets and the plugin registration surface.

use crate::backend::DeviceBackend;
use crate::config::HostConfig;
use crate::streamset::{ReadOutcome, StreamSet};
use crate::types::StreamSetHandle;
use crate::{FramehubError, Result};
use std::collections::BTreeMap;

/// What a plugin may do inside the host namespace.
pub trait PluginService {
    /// Register a device's stream set under a unique name.
    fn create_stream_set(
        &mut self,
        name: &str,
        uri: &str,
        device: Box<dyn DeviceBackend>,
    ) -> Result<StreamSetHandle>;

    /// Close and drop a stream set.
    fn destroy_stream_set(&mut self, handle: StreamSetHandle) -> Result<()>;
}

/// A backend plugin.
pub trait Plugin: Send {
    fn name(&self) -> &str;

    /// Called once on registration; typically creates stream sets.
    fn initialize(&mut self, service: &mut dyn PluginService) -> Result<()>;

    /// Called once at host shutdown, in reverse registration order.
    fn cleanup(&mut self, service: &mut dyn PluginService);
}

/// Owns every registered stream set, keyed by handle.
pub struct Host {
    config: HostConfig,
    sets: BTreeMap<StreamSetHandle, StreamSet>,
    next_handle: u64,
    plugins: Vec<Box<dyn Plugin>>,
}

impl Host {
    /// Host configured from the environment.
    pub fn new() -> Self {
        Self::with_config(HostConfig::from_env())
    }

    pub fn with_config(config: HostConfig) -> Self {
        Self {
            config,
            sets: BTreeMap::new(),
            next_handle: 0,
            plugins: Vec::new(),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn register_plugin(&mut self, mut plugin: Box<dyn Plugin>) -> Result<()> {
        log::info!("initializing plugin {}", plugin.name());
        plugin.initialize(self)?;
        self.plugins.push(plugin);
        Ok(())
    }

    pub fn stream_set(&self, handle: StreamSetHandle) -> Result<&StreamSet> {
        self.sets
            .get(&handle)
            .ok_or(FramehubError::UnknownStreamSet(handle))
    }

    pub fn stream_set_mut(&mut self, handle: StreamSetHandle) -> Result<&mut StreamSet> {
        self.sets
            .get_mut(&handle)
            .ok_or(FramehubError::UnknownStreamSet(handle))
    }

    pub fn find_stream_set(&self, name: &str) -> Option<StreamSetHandle> {
        self.sets
            .iter()
            .find(|(_, set)| set.name() == name)
            .map(|(handle, _)| *handle)
    }

    pub fn stream_set_handles(&self) -> impl Iterator<Item = StreamSetHandle> + '_ {
        self.sets.keys().copied()
    }

    /// Read every open stream set once with the configured timeout.
    ///
    /// Returns the number of sets that delivered frames. Timeouts are not
    /// failures; read errors are logged and the remaining sets still read.
    pub fn read_all(&mut self) -> usize {
        let timeout = self.config.read_timeout;
        let mut delivered = 0;
        for (handle, set) in self.sets.iter_mut().filter(|(_, s)| s.is_open()) {
            match set.read(timeout) {
                Ok(ReadOutcome::Frames { .. }) => delivered += 1,
                Ok(_) => {}
                Err(e) => log::warn!("{} ({}) read failed: {}", set.name(), handle, e),
            }
        }
        delivered
    }

    /// Clean up plugins in reverse order, then drop any remaining stream sets.
    pub fn shutdown(&mut self) {
        let plugins = std::mem::take(&mut self.plugins);
        for mut plugin in plugins.into_iter().rev() {
            log::info!("cleaning up plugin {}", plugin.name());
            plugin.cleanup(self);
        }
        if !self.sets.is_empty() {
            log::info!("destroying {} leftover stream set(s)", self.sets.len());
            self.sets.clear();
        }
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginService for Host {
    fn create_stream_set(
        &mut self,
        name: &str,
        uri: &str,
        device: Box<dyn DeviceBackend>,
    ) -> Result<StreamSetHandle> {
        if self.find_stream_set(name).is_some() {
            return Err(FramehubError::DuplicateStreamSet(name.to_string()));
        }

        self.next_handle += 1;
        let handle = StreamSetHandle(self.next_handle);
        let set = StreamSet::with_config(name, uri, device, self.config.stream_set);
        self.sets.insert(handle, set);

        log::info!("created stream set '{}' ({}) for {}", name, handle, uri);
        Ok(handle)
    }

    fn destroy_stream_set(&mut self, handle: StreamSetHandle) -> Result<()> {
        let mut set = self
            .sets
            .remove(&handle)
            .ok_or(FramehubError::UnknownStreamSet(handle))?;
        set.close();
        log::info!("destroyed stream set '{}' ({})", set.name(), handle);
        Ok(())
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::DepthFrame;
    use crate::sim::{SimConfig, SimDevice, SimPlugin};
    use crate::types::{Sensors, StreamDescription, StreamType, WaitTimeout};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn test_host() -> Host {
        Host::with_config(HostConfig {
            read_timeout: WaitTimeout::Bounded(Duration::from_millis(50)),
            ..HostConfig::default()
        })
    }

    #[test]
    fn test_create_and_destroy_stream_set() {
        let mut host = test_host();
        let device = SimDevice::new(SimConfig::manual(Sensors::DEPTH));

        let handle = host
            .create_stream_set("cam0", "sim://cam0", Box::new(device.clone()))
            .unwrap();
        assert_eq!(host.find_stream_set("cam0"), Some(handle));
        assert!(matches!(
            host.create_stream_set("cam0", "sim://other", Box::new(device)),
            Err(FramehubError::DuplicateStreamSet(_))
        ));

        host.stream_set_mut(handle).unwrap().open().unwrap();
        host.destroy_stream_set(handle).unwrap();
        assert!(host.stream_set(handle).is_err());
        assert!(matches!(
            host.destroy_stream_set(handle),
            Err(FramehubError::UnknownStreamSet(_))
        ));
    }

    #[test]
    fn test_plugin_registers_and_reads() {
        let mut host = test_host();
        let plugin = SimPlugin::new("cam", SimConfig::manual(Sensors::DEPTH | Sensors::COLOR));
        let depth_in = plugin.device().injector(StreamType::Depth).unwrap();
        host.register_plugin(Box::new(plugin)).unwrap();

        let handle = host.find_stream_set("cam").unwrap();
        let depth = StreamDescription::of(StreamType::Depth);
        {
            let set = host.stream_set_mut(handle).unwrap();
            assert_eq!(set.uri(), "sim://cam");
            set.open().unwrap();
            set.start_stream(depth).unwrap();
        }

        assert_eq!(host.read_all(), 0);
        depth_in.push_pattern().unwrap();
        assert_eq!(host.read_all(), 1);

        let set = host.stream_set(handle).unwrap();
        let reader = set.reader_frame();
        let frame = DepthFrame::new(Some(&reader));
        assert_eq!(frame.frame_index().unwrap(), 1);
        assert_eq!(frame.sample(0, 0).unwrap(), 500);
    }

    struct Recording {
        id: &'static str,
        events: Arc<Mutex<Vec<String>>>,
    }

    impl Plugin for Recording {
        fn name(&self) -> &str {
            self.id
        }

        fn initialize(&mut self, _service: &mut dyn PluginService) -> Result<()> {
            self.events.lock().unwrap().push(format!("init {}", self.id));
            Ok(())
        }

        fn cleanup(&mut self, _service: &mut dyn PluginService) {
            self.events.lock().unwrap().push(format!("cleanup {}", self.id));
        }
    }

    #[test]
    fn test_shutdown_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut host = test_host();
        for id in ["a", "b"] {
            host.register_plugin(Box::new(Recording {
                id,
                events: events.clone(),
            }))
            .unwrap();
        }
        let sim = SimPlugin::new("cam", SimConfig::manual(Sensors::DEPTH));
        host.register_plugin(Box::new(sim)).unwrap();
        assert_eq!(host.stream_set_handles().count(), 1);

        host.shutdown();
        assert_eq!(host.stream_set_handles().count(), 0);
        assert_eq!(
            *events.lock().unwrap(),
            vec!["init a", "init b", "cleanup b", "cleanup a"]
        );
    }
}
