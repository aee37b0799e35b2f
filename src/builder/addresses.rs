//! Listener address, placement and security-group folding
//!
//! Address annotations fold across group members into single slots: two
//! members naming different concrete addresses for the same slot is a
//! fatal configuration error. Subnets accumulate in first-seen order and
//! resolve into balancer locations; security groups union into a sorted
//! set. The network id comes from the resolved subnets and must agree
//! across all of them.

use std::collections::BTreeSet;

use k8s_openapi::api::networking::v1::Ingress;

use crate::annotations::{self, ingress_id};
use crate::cloud::SubnetResolver;
use crate::model::{ListenerAddress, Location};
use crate::{Error, Result};

/// Marker value requesting cloud address auto-assignment
const AUTO: &str = "auto";

/// Resolved placement and addressing for one group's balancer
#[derive(Clone, Debug, PartialEq)]
pub struct BalancerPlacement {
    /// Listener addresses in slot order (external v4, then internal v4)
    pub addresses: Vec<ListenerAddress>,
    /// Zone/subnet locations, sorted for determinism
    pub locations: Vec<Location>,
    /// Security group ids, sorted and deduplicated
    pub security_group_ids: Vec<String>,
    /// Network all subnets belong to
    pub network_id: String,
}

/// Folds address-related annotations across the members of one group
pub struct AddressFold<'a> {
    tag: &'a str,
    external_ipv4: Option<String>,
    internal_ipv4: Option<String>,
    internal_subnet: Option<String>,
    subnets: Vec<String>,
    security_groups: BTreeSet<String>,
}

impl<'a> AddressFold<'a> {
    pub fn new(tag: &'a str) -> Self {
        Self {
            tag,
            external_ipv4: None,
            internal_ipv4: None,
            internal_subnet: None,
            subnets: Vec::new(),
            security_groups: BTreeSet::new(),
        }
    }

    /// Fold one member's annotations into the accumulated slots
    pub fn fold(&mut self, ingress: &Ingress) -> Result<()> {
        if let Some(v) = annotations::get(ingress, annotations::EXTERNAL_IPV4_ADDRESS) {
            let value = normalize_address(v);
            fill_slot(
                &mut self.external_ipv4,
                value,
                self.tag,
                ingress,
                annotations::EXTERNAL_IPV4_ADDRESS,
            )?;
        }
        if let Some(v) = annotations::get(ingress, annotations::INTERNAL_IPV4_ADDRESS) {
            let value = normalize_address(v);
            fill_slot(
                &mut self.internal_ipv4,
                value,
                self.tag,
                ingress,
                annotations::INTERNAL_IPV4_ADDRESS,
            )?;
        }
        if let Some(v) = annotations::get(ingress, annotations::INTERNAL_ADDRESS_SUBNET) {
            fill_slot(
                &mut self.internal_subnet,
                v.to_string(),
                self.tag,
                ingress,
                annotations::INTERNAL_ADDRESS_SUBNET,
            )?;
        }
        if let Some(list) = annotations::get_list(ingress, annotations::SUBNETS) {
            for subnet in list {
                if !self.subnets.contains(&subnet) {
                    self.subnets.push(subnet);
                }
            }
        }
        if let Some(list) = annotations::get_list(ingress, annotations::SECURITY_GROUPS) {
            self.security_groups.extend(list);
        }
        Ok(())
    }

    /// Resolve the folded slots into concrete placement
    ///
    /// With neither address annotation present, the balancer defaults to
    /// an auto-assigned external IPv4 address. An internal address falls
    /// back to the first placement subnet when no dedicated subnet is
    /// annotated; with no subnet available at all it is fatal.
    pub async fn finish(self, resolver: &dyn SubnetResolver) -> Result<BalancerPlacement> {
        if self.subnets.is_empty() {
            return Err(Error::configuration_for(
                self.tag,
                "no subnets annotated; the balancer needs at least one placement subnet",
            ));
        }

        let mut locations = Vec::with_capacity(self.subnets.len());
        let mut network_id: Option<String> = None;
        for subnet_id in &self.subnets {
            let subnet = resolver.resolve_subnet(subnet_id).await?;
            match &network_id {
                None => network_id = Some(subnet.network_id.clone()),
                Some(existing) if *existing != subnet.network_id => {
                    return Err(Error::configuration_for(
                        self.tag,
                        format!(
                            "subnets span networks {} and {}",
                            existing, subnet.network_id
                        ),
                    ));
                }
                Some(_) => {}
            }
            locations.push(Location {
                zone_id: subnet.zone_id,
                subnet_id: subnet.id,
                disable_traffic: false,
            });
        }
        locations.sort();
        let network_id = network_id.unwrap_or_default();

        let mut addresses = Vec::new();
        if let Some(address) = self.external_ipv4 {
            addresses.push(ListenerAddress::ExternalIpv4 { address });
        }
        if let Some(address) = self.internal_ipv4 {
            let subnet_id = self
                .internal_subnet
                .or_else(|| self.subnets.first().cloned())
                .ok_or_else(|| {
                    Error::configuration_for(
                        self.tag,
                        "internal address requires a subnet to allocate from",
                    )
                })?;
            addresses.push(ListenerAddress::InternalIpv4 { address, subnet_id });
        }
        if addresses.is_empty() {
            addresses.push(ListenerAddress::ExternalIpv4 {
                address: String::new(),
            });
        }

        Ok(BalancerPlacement {
            addresses,
            locations,
            security_group_ids: self.security_groups.into_iter().collect(),
            network_id,
        })
    }
}

/// `auto` normalizes to the empty string the model uses for auto-assignment
fn normalize_address(value: &str) -> String {
    if value.eq_ignore_ascii_case(AUTO) {
        String::new()
    } else {
        value.to_string()
    }
}

/// Fill a single-value slot, rejecting conflicting values from different
/// members
fn fill_slot(
    slot: &mut Option<String>,
    value: String,
    tag: &str,
    ingress: &Ingress,
    key: &str,
) -> Result<()> {
    match slot {
        None => {
            *slot = Some(value);
            Ok(())
        }
        Some(existing) if *existing != value => Err(Error::configuration_for_ingress(
            tag,
            ingress_id(ingress),
            format!(
                "conflicting values for {}: '{}' vs '{}'",
                key, existing, value
            ),
        )),
        Some(_) => Ok(()),
    }
}
