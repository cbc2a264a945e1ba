use mac_address::MacAddress;

use crate::messages::BroadcastEvent;

/// How the sensor of interest is recognised among nearby advertisers.
#[derive(Clone, Debug, PartialEq)]
pub enum MatchPolicy {
    Address(MacAddress),
    NamePrefix(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeviceFilter {
    policy: MatchPolicy,
    manufacturer_id: Option<u16>,
}

impl DeviceFilter {
    pub fn by_address(address: MacAddress, manufacturer_id: Option<u16>) -> Self {
        DeviceFilter {
            policy: MatchPolicy::Address(address),
            manufacturer_id,
        }
    }

    /// Name prefixes are not unique, so a manufacturer id is always required alongside.
    pub fn by_name_prefix(prefix: impl Into<String>, manufacturer_id: u16) -> Self {
        DeviceFilter {
            policy: MatchPolicy::NamePrefix(prefix.into()),
            manufacturer_id: Some(manufacturer_id),
        }
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    pub fn manufacturer_id(&self) -> Option<u16> {
        self.manufacturer_id
    }

    pub fn matches(&self, event: &BroadcastEvent) -> bool {
        let identified = match &self.policy {
            MatchPolicy::Address(address) => event.address == *address,
            MatchPolicy::NamePrefix(prefix) => event
                .name
                .as_deref()
                .is_some_and(|name| name.starts_with(prefix.as_str())),
        };

        identified
            && self.manufacturer_id.is_none_or(|id| {
                event
                    .manufacturer_data
                    .get(&id)
                    .is_some_and(|data| !data.is_empty())
            })
    }
}
