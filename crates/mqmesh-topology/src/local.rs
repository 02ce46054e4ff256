//! In-process provisioner
//!
//! Stands in for the cloud provider during dry runs and tests. It hands out
//! addresses the way the provider does: hosts start at `.4` of their subnet,
//! firewalls and containers draw from the subnet they are attached to, and
//! public addresses come from `203.0.113.0/24`.

use crate::deferred::ResourceOutputs;
use crate::executor::{CreateRequest, Provisioner};
use crate::graph::{attr, ResourceKind};
use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use mqmesh_common::ResourceId;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use tracing::trace;

/// Hosts below this offset are reserved by the provider
const FIRST_HOST: u32 = 4;

const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
const DIGITS: &str = "0123456789";
const SPECIAL: &str = "!#$%&*()-_=+[]{}<>:?";
const KEY_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

#[derive(Debug)]
struct Subnet {
    network: Ipv4Network,
    next: u32,
}

#[derive(Debug, Default)]
struct State {
    /// Keyed by the id reported for the subnet
    subnets: HashMap<String, Subnet>,
    /// Network profile id -> subnet id
    profiles: HashMap<String, String>,
    public_ips: u8,
    created: Vec<ResourceId>,
}

/// Deterministic local stand-in for the provider
pub struct LocalProvisioner {
    state: Mutex<State>,
    rng: Mutex<StdRng>,
    fail_on: HashSet<ResourceId>,
}

impl LocalProvisioner {
    pub fn new(seed: u64) -> Self {
        Self {
            state: Mutex::new(State::default()),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            fail_on: HashSet::new(),
        }
    }

    /// Make creation of `id` fail
    pub fn fail_on(mut self, id: impl Into<ResourceId>) -> Self {
        self.fail_on.insert(id.into());
        self
    }

    /// Resources created so far, in completion order
    pub fn created(&self) -> Vec<ResourceId> {
        self.state.lock().created.clone()
    }

    fn provider_id(request: &CreateRequest) -> String {
        format!("/local/{:?}/{}", request.kind, request.id)
    }

    fn random_string(&self, alphabet: &[u8], length: usize) -> String {
        let mut rng = self.rng.lock();
        (0..length)
            .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
            .collect()
    }

    fn cookie(&self, properties: &Value) -> anyhow::Result<String> {
        let flag = |key: &str| properties[key].as_bool().unwrap_or(false);
        let length = properties["length"]
            .as_u64()
            .ok_or_else(|| anyhow!("random string without a length"))?;

        let mut alphabet = String::new();
        for (key, chars) in [("upper", UPPER), ("lower", LOWER), ("number", DIGITS), ("special", SPECIAL)] {
            if flag(key) {
                alphabet.push_str(chars);
            }
        }
        if alphabet.is_empty() {
            bail!("random string allows no characters");
        }
        Ok(self.random_string(alphabet.as_bytes(), length as usize))
    }

    fn next_host(state: &mut State, subnet_id: &str) -> anyhow::Result<Ipv4Addr> {
        let subnet = state
            .subnets
            .get_mut(subnet_id)
            .ok_or_else(|| anyhow!("unknown subnet {subnet_id}"))?;
        let address = subnet
            .network
            .nth(subnet.next)
            .ok_or_else(|| anyhow!("subnet {} exhausted", subnet.network))?;
        subnet.next += 1;
        Ok(address)
    }
}

impl Default for LocalProvisioner {
    fn default() -> Self {
        Self::new(0)
    }
}

fn str_at<'v>(value: &'v Value, pointer: &str) -> anyhow::Result<&'v str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("missing property {pointer}"))
}

#[async_trait]
impl Provisioner for LocalProvisioner {
    async fn create(&self, request: CreateRequest) -> anyhow::Result<ResourceOutputs> {
        if self.fail_on.contains(&request.id) {
            bail!("injected failure creating {}", request.id);
        }

        let id = Self::provider_id(&request);
        let props = &request.properties;
        let mut outputs = ResourceOutputs::new();
        outputs.insert(attr::ID.into(), json!(id));
        if request.kind.reports(attr::NAME) {
            let name = props["name"].as_str().unwrap_or(request.id.as_str());
            outputs.insert(attr::NAME.into(), json!(name));
        }

        match request.kind {
            ResourceKind::RandomString => {
                outputs.insert(attr::RESULT.into(), json!(self.cookie(props)?));
            }
            ResourceKind::StorageAccount => {
                let key = self.random_string(KEY_ALPHABET.as_bytes(), 88);
                outputs.insert(attr::PRIMARY_ACCESS_KEY.into(), json!(key));
            }
            ResourceKind::Subnet => {
                let prefix = str_at(props, "/addressPrefixes/0")?;
                let network: Ipv4Network = prefix
                    .parse()
                    .with_context(|| format!("subnet {} prefix {prefix}", request.id))?;
                self.state.lock().subnets.insert(
                    id.clone(),
                    Subnet {
                        network,
                        next: FIRST_HOST,
                    },
                );
            }
            ResourceKind::NetworkProfile => {
                let subnet = str_at(props, "/containerNetworkInterface/ipConfigurations/0/subnetId")?;
                self.state.lock().profiles.insert(id.clone(), subnet.to_string());
            }
            ResourceKind::PublicIp => {
                let mut state = self.state.lock();
                state.public_ips = state
                    .public_ips
                    .checked_add(1)
                    .ok_or_else(|| anyhow!("public address pool exhausted"))?;
                let address = Ipv4Addr::new(203, 0, 113, state.public_ips);
                outputs.insert(attr::IP_ADDRESS.into(), json!(address.to_string()));
            }
            ResourceKind::Firewall => {
                let subnet = str_at(props, "/ipConfigurations/0/subnetId")?;
                let address = Self::next_host(&mut self.state.lock(), subnet)?;
                outputs.insert(attr::PRIVATE_IP_ADDRESS.into(), json!(address.to_string()));
            }
            ResourceKind::ContainerGroup => {
                let profile = str_at(props, "/networkProfileId")?;
                let mut state = self.state.lock();
                let subnet = state
                    .profiles
                    .get(profile)
                    .cloned()
                    .ok_or_else(|| anyhow!("unknown network profile {profile}"))?;
                let address = Self::next_host(&mut state, &subnet)?;
                outputs.insert(attr::IP_ADDRESS.into(), json!(address.to_string()));
            }
            _ => {}
        }

        trace!(resource = %request.id, kind = ?request.kind, "local create");
        self.state.lock().created.push(request.id);
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(id: &str, kind: ResourceKind, properties: Value) -> CreateRequest {
        CreateRequest {
            id: ResourceId::new(id),
            kind,
            type_token: kind.type_token(),
            properties,
            depends_on: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_cookie_shape() {
        let local = LocalProvisioner::new(7);
        let props = json!({ "length": 20, "upper": true, "lower": false, "number": false, "special": false });
        let outputs = local
            .create(request("rabbit-cookie", ResourceKind::RandomString, props.clone()))
            .await
            .unwrap();

        let cookie = outputs[attr::RESULT].as_str().unwrap();
        assert_eq!(cookie.len(), 20);
        assert!(cookie.chars().all(|c| c.is_ascii_uppercase()));

        let again = LocalProvisioner::new(7)
            .create(request("rabbit-cookie", ResourceKind::RandomString, props))
            .await
            .unwrap();
        assert_eq!(again[attr::RESULT], outputs[attr::RESULT]);
    }

    #[tokio::test]
    async fn test_empty_alphabet_rejected() {
        let local = LocalProvisioner::default();
        let props = json!({ "length": 5, "upper": false });
        assert!(local
            .create(request("c", ResourceKind::RandomString, props))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_hosts_come_from_subnet() {
        let local = LocalProvisioner::default();
        let subnet = local
            .create(request(
                "snet-in-1",
                ResourceKind::Subnet,
                json!({ "name": "snet-in-1", "addressPrefixes": ["10.3.0.0/16"] }),
            ))
            .await
            .unwrap();
        let subnet_id = subnet[attr::ID].clone();

        let profile = local
            .create(request(
                "np-1",
                ResourceKind::NetworkProfile,
                json!({ "containerNetworkInterface": { "ipConfigurations": [{ "subnetId": subnet_id }] } }),
            ))
            .await
            .unwrap();

        let container = local
            .create(request(
                "aci-1",
                ResourceKind::ContainerGroup,
                json!({ "name": "aci-1", "networkProfileId": profile[attr::ID] }),
            ))
            .await
            .unwrap();
        assert_eq!(container[attr::IP_ADDRESS], "10.3.0.4");
        assert_eq!(container[attr::NAME], "aci-1");

        let second = local
            .create(request(
                "aci-2",
                ResourceKind::ContainerGroup,
                json!({ "networkProfileId": profile[attr::ID] }),
            ))
            .await
            .unwrap();
        assert_eq!(second[attr::IP_ADDRESS], "10.3.0.5");
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let local = LocalProvisioner::default().fail_on("fw-rabbitmq1");
        let err = local
            .create(request("fw-rabbitmq1", ResourceKind::Firewall, json!({})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("injected failure"));
        assert!(local.created().is_empty());
    }

    #[tokio::test]
    async fn test_firewall_on_unknown_subnet() {
        let local = LocalProvisioner::default();
        let props = json!({ "ipConfigurations": [{ "subnetId": "/nowhere" }] });
        let err = local
            .create(request("fw", ResourceKind::Firewall, props))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown subnet"));
    }
}
