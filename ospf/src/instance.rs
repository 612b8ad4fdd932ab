// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use crate::fsm::{HelloTransmitter, InterfaceFsm, LsaRequest};
use crate::interface::{InterfaceConfig, InterfaceStatus, NeighborMessage};
use crate::log::instance_log;
use mg_common::{read_lock, write_lock};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use slog::Logger;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, RwLock};
use std::time::Duration;

const UNIT_INSTANCE: &str = "instance";

fn resolution_default() -> Duration {
    Duration::from_millis(100)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InstanceConfig {
    pub router_id: Ipv4Addr,

    /// How often interface timers are ticked.
    #[serde(default = "resolution_default")]
    pub resolution: Duration,
}

/// The set of interfaces running the protocol, keyed by name.
pub struct Instance {
    config: InstanceConfig,
    interfaces: RwLock<BTreeMap<String, InterfaceFsm>>,
    transmitter: Arc<dyn HelloTransmitter>,
    lsa_tx: SyncSender<LsaRequest>,
    log: Logger,
}

impl Instance {
    pub fn new(
        config: InstanceConfig,
        transmitter: Arc<dyn HelloTransmitter>,
        lsa_tx: SyncSender<LsaRequest>,
        log: Logger,
    ) -> Self {
        Self {
            config,
            interfaces: RwLock::new(BTreeMap::new()),
            transmitter,
            lsa_tx,
            log,
        }
    }

    pub fn router_id(&self) -> Ipv4Addr {
        self.config.router_id
    }

    pub fn start_interface(&self, config: InterfaceConfig) -> Result<(), Error> {
        let mut interfaces = write_lock!(self.interfaces);
        if interfaces.contains_key(&config.name) {
            return Err(Error::InterfaceExists(config.name));
        }
        let name = config.name.clone();
        let fsm = InterfaceFsm::start(
            config,
            self.config.router_id,
            self.config.resolution,
            self.transmitter.clone(),
            self.lsa_tx.clone(),
            self.log.clone(),
        )?;
        instance_log!(self.log, info, "interface started";
            "interface" => name.as_str()
        );
        interfaces.insert(name, fsm);
        Ok(())
    }

    /// Stop an interface and forget it. The interface is removed even if it
    /// does not acknowledge the stop in time.
    pub fn stop_interface(&self, name: &str) -> Result<(), Error> {
        let fsm = write_lock!(self.interfaces).remove(name);
        match fsm {
            Some(fsm) => fsm.stop(),
            None => Err(self.unknown(name)),
        }
    }

    pub fn interfaces(&self) -> Vec<String> {
        read_lock!(self.interfaces).keys().cloned().collect()
    }

    pub fn status(&self, name: &str) -> Result<InterfaceStatus, Error> {
        self.with(name, |fsm| Ok(fsm.status()))
    }

    pub fn neighbor_create(
        &self,
        name: &str,
        msg: NeighborMessage,
    ) -> Result<(), Error> {
        self.with(name, |fsm| fsm.neighbor_create(msg))
    }

    pub fn neighbor_change(
        &self,
        name: &str,
        msg: NeighborMessage,
    ) -> Result<(), Error> {
        self.with(name, |fsm| fsm.neighbor_change(msg))
    }

    pub fn neighbor_down(
        &self,
        name: &str,
        router_id: Ipv4Addr,
    ) -> Result<(), Error> {
        self.with(name, |fsm| fsm.neighbor_down(router_id))
    }

    pub fn neighbor_full(
        &self,
        name: &str,
        router_id: Ipv4Addr,
        full: bool,
    ) -> Result<(), Error> {
        self.with(name, |fsm| fsm.neighbor_full(router_id, full))
    }

    pub fn backup_seen(&self, name: &str) -> Result<(), Error> {
        self.with(name, |fsm| fsm.backup_seen())
    }

    /// Stop every interface.
    pub fn shutdown(&self) {
        let interfaces = std::mem::take(&mut *write_lock!(self.interfaces));
        for (name, fsm) in interfaces {
            if let Err(e) = fsm.stop() {
                instance_log!(self.log, warn, "interface stop failed: {e}";
                    "interface" => name.as_str()
                );
            }
        }
    }

    fn with<T, F>(&self, name: &str, f: F) -> Result<T, Error>
    where
        F: FnOnce(&InterfaceFsm) -> Result<T, Error>,
    {
        match read_lock!(self.interfaces).get(name) {
            Some(fsm) => f(fsm),
            None => Err(self.unknown(name)),
        }
    }

    fn unknown(&self, name: &str) -> Error {
        instance_log!(self.log, warn, "no such interface";
            "interface" => name
        );
        Error::UnknownInterface(name.to_string())
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::interface::{Hello, IfState, InterfaceType};
    use mg_common::log::init_logger;
    use mg_common::wait_for_eq;
    use pretty_assertions::assert_eq;
    use std::sync::mpsc::sync_channel;

    struct NullTransmitter;

    impl HelloTransmitter for NullTransmitter {
        fn send_hello(&self, _: &str, _: Hello) -> Result<(), Error> {
            Ok(())
        }
    }

    fn interface(name: &str, last: u8) -> InterfaceConfig {
        InterfaceConfig {
            name: name.into(),
            address: Ipv4Addr::new(10, 0, last, 1),
            area: Ipv4Addr::UNSPECIFIED,
            if_type: InterfaceType::Broadcast,
            priority: 1,
            hello_interval: Duration::from_millis(50),
            dead_interval: Duration::from_secs(60),
        }
    }

    #[test]
    fn interface_lifecycle() -> anyhow::Result<()> {
        let (lsa_tx, _lsa_rx) = sync_channel(64);
        let inst = Instance::new(
            InstanceConfig {
                router_id: Ipv4Addr::new(1, 1, 1, 1),
                resolution: Duration::from_millis(5),
            },
            Arc::new(NullTransmitter),
            lsa_tx,
            init_logger(),
        );

        inst.start_interface(interface("eth0", 0))?;
        inst.start_interface(interface("eth1", 1))?;
        assert!(matches!(
            inst.start_interface(interface("eth0", 0)),
            Err(Error::InterfaceExists(_))
        ));
        assert_eq!(inst.interfaces(), vec!["eth0", "eth1"]);
        wait_for_eq!(inst.status("eth1")?.state, IfState::Waiting);

        let neighbor = NeighborMessage {
            router_id: Ipv4Addr::new(2, 2, 2, 2),
            address: Ipv4Addr::new(10, 0, 1, 2),
            priority: 1,
            two_way: true,
            dr: Ipv4Addr::UNSPECIFIED,
            bdr: Ipv4Addr::UNSPECIFIED,
        };
        inst.neighbor_create("eth1", neighbor)?;
        wait_for_eq!(inst.status("eth1")?.neighbors.len(), 1);
        assert_eq!(inst.status("eth0")?.neighbors.len(), 0);

        assert!(matches!(
            inst.neighbor_create("eth9", neighbor),
            Err(Error::UnknownInterface(_))
        ));
        assert!(matches!(
            inst.backup_seen("eth9"),
            Err(Error::UnknownInterface(_))
        ));

        inst.stop_interface("eth0")?;
        assert_eq!(inst.interfaces(), vec!["eth1"]);
        assert!(matches!(
            inst.stop_interface("eth0"),
            Err(Error::UnknownInterface(_))
        ));

        inst.shutdown();
        assert!(inst.interfaces().is_empty());
        Ok(())
    }

    #[test]
    fn instance_config_defaults() -> anyhow::Result<()> {
        let cfg: InstanceConfig =
            serde_json::from_str(r#"{"router_id": "1.2.3.4"}"#)?;
        assert_eq!(cfg.resolution, Duration::from_millis(100));
        Ok(())
    }
}
