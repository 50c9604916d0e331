//! Simulated vehicle on the link side of the transport.
//!
//! Answers parameter commands for a set of components and drops every
//! outgoing notification with a fixed probability.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use skyparam_core::{parameter_set_hash, ComponentId, ParamType, ParamValue, HASH_CHECK_PARAM};
use skyparam_sync::{InboundMessage, LinkEndpoint, ParamCommand, ParamValueNotification};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Ceiling the simulated autopilot applies to altitude parameters, so some
/// writes come back adjusted.
const MAX_ALTITUDE: f32 = 120.0;

pub struct SimVehicle {
    vehicle_id: u8,
    endpoint: LinkEndpoint,
    components: BTreeMap<ComponentId, Vec<(String, ParamValue)>>,
    loss: f64,
    rng: StdRng,
    dropped: u64,
    delivered: u64,
    saves: u64,
}

impl SimVehicle {
    /// Builds an autopilot with `param_count` parameters plus a small camera.
    pub fn new(vehicle_id: u8, endpoint: LinkEndpoint, param_count: usize, loss: f64, seed: u64) -> Self {
        let mut autopilot = vec![
            ("SYS_AUTOSTART".to_string(), ParamValue::Int32(4001)),
            ("CRUISE_SPEED".to_string(), ParamValue::Float(10.0)),
            ("MIS_TAKEOFF_ALT".to_string(), ParamValue::Float(2.5)),
            ("BAT_N_CELLS".to_string(), ParamValue::Uint8(4)),
        ];
        let mut rng = StdRng::seed_from_u64(seed);
        for i in autopilot.len()..param_count {
            let ty = ParamType::ALL[i % ParamType::ALL.len()];
            let value = ParamValue::from_i64(ty, rng.gen_range(0..100)).unwrap_or(ParamValue::Int32(0));
            autopilot.push((format!("SIM_P{:04}", i), value));
        }

        let camera = vec![
            ("CAM_MODE".to_string(), ParamValue::Int32(0)),
            ("CAM_ZOOM".to_string(), ParamValue::Float(1.0)),
        ];

        let mut components = BTreeMap::new();
        components.insert(ComponentId(1), autopilot);
        components.insert(ComponentId(100), camera);

        SimVehicle {
            vehicle_id,
            endpoint,
            components,
            loss,
            rng,
            dropped: 0,
            delivered: 0,
            saves: 0,
        }
    }

    /// Serves commands until the engine drops its side of the link.
    pub async fn run(mut self) {
        info!(vehicle_id = self.vehicle_id, loss = self.loss, "Simulated vehicle online");

        while let Some(command) = self.endpoint.recv_command().await {
            debug!(cmd_type = %command.type_name(), component = %command.component(), "Vehicle received command");
            match command {
                ParamCommand::RequestList { component } => {
                    for id in self.targets(component) {
                        let count = self.components.get(&id).map_or(0, Vec::len);
                        for index in 0..count {
                            self.send_value(id, index, true).await;
                        }
                    }
                }
                ParamCommand::ReadByIndex { component, index } => {
                    self.send_value(component, usize::from(index), true).await;
                }
                ParamCommand::ReadByName { component, name } => {
                    if let Some(index) = self.position(component, &name) {
                        self.send_value(component, index, false).await;
                    }
                }
                ParamCommand::Write {
                    component,
                    name,
                    value,
                } => {
                    if let Some(index) = self.position(component, &name) {
                        let stored = clamp_altitude(&name, value);
                        if let Some(params) = self.components.get_mut(&component) {
                            params[index].1 = stored;
                        }
                        self.send_value(component, index, false).await;
                    }
                }
                ParamCommand::RequestHash { .. } => self.send_hash().await,
                ParamCommand::SaveToStorage { component } => {
                    self.saves += 1;
                    debug!(component = %component, saves = self.saves, "Parameters committed to storage");
                }
            }
        }

        info!(
            delivered = self.delivered,
            dropped = self.dropped,
            saves = self.saves,
            "Simulated vehicle offline"
        );
    }

    fn targets(&self, component: ComponentId) -> Vec<ComponentId> {
        if component.is_broadcast() {
            self.components.keys().copied().collect()
        } else {
            vec![component]
        }
    }

    fn position(&self, component: ComponentId, name: &str) -> Option<usize> {
        self.components
            .get(&component)?
            .iter()
            .position(|(n, _)| n == name)
    }

    async fn send_value(&mut self, component: ComponentId, index: usize, with_index: bool) {
        let Some(params) = self.components.get(&component) else {
            return;
        };
        let Some((name, value)) = params.get(index) else {
            return;
        };

        let message = InboundMessage::ParamValue(ParamValueNotification {
            vehicle_id: self.vehicle_id,
            component,
            name: name.clone(),
            count: params.len() as u16,
            index: with_index.then_some(index as u16),
            value: *value,
        });
        self.deliver(message).await;
    }

    /// Reports the hash the way autopilots do: as the pseudo parameter.
    async fn send_hash(&mut self) {
        let hash = parameter_set_hash(self.components.iter().flat_map(|(id, params)| {
            params
                .iter()
                .map(move |(name, value)| (*id, name.as_str(), *value))
        }));

        let message = InboundMessage::ParamValue(ParamValueNotification {
            vehicle_id: self.vehicle_id,
            component: ComponentId(1),
            name: HASH_CHECK_PARAM.to_string(),
            count: 0,
            index: None,
            value: ParamValue::Uint32(hash),
        });
        self.deliver(message).await;
    }

    async fn deliver(&mut self, message: InboundMessage) {
        if self.rng.gen_bool(self.loss) {
            self.dropped += 1;
            return;
        }
        self.delivered += 1;
        let _ = self.endpoint.deliver(message).await;
    }
}

fn clamp_altitude(name: &str, value: ParamValue) -> ParamValue {
    match value {
        ParamValue::Float(v) if name.ends_with("_ALT") && v > MAX_ALTITUDE => ParamValue::Float(MAX_ALTITUDE),
        other => other,
    }
}
