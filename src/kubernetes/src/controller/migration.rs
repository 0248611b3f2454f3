use std::{collections::BTreeMap, net::IpAddr, str::FromStr};

use ipnet::IpNet;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{api::PostParams, core::ObjectMeta, Api, Client, ResourceExt};
use serde::{Deserialize, Serialize};
use vlbd_ipam::{
    range::{addr_to_u128, RangeSet},
    selector::ALL,
};

use crate::crd::ip_pool::{IPPool, IPPoolSpec, IPPoolStatus, Range, Selector, Tuple};

use super::error::Error;

pub const KUBEVIP_CONFIG_MAP: &str = "kubevip";
pub const KUBEVIP_CONFIG_MAP_NAMESPACE: &str = "kube-system";
pub const KUBEVIP_SERVICES_KEY: &str = "kubevip-services";
pub const GLOBAL_POOL_NAME: &str = "global";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Cidr,
    Range,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubevipService {
    pub vip: String,
    pub service_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubevipServices {
    #[serde(default)]
    pub services: Vec<KubevipService>,
}

/// Splits a data key such as `cidr-default` into its format and pool name.
pub fn parse_key(key: &str) -> Option<(Format, String)> {
    let (format, name) = key.split_once('-')?;
    if name.is_empty() {
        return None;
    }
    let format = match format {
        "cidr" => Format::Cidr,
        "range" => Format::Range,
        _ => return None,
    };
    Some((format, name.to_string()))
}

/// Smallest network holding both `start` and `end`. The prefix never reaches a host route.
pub fn common_subnet(start: IpAddr, end: IpAddr) -> Result<IpNet, Error> {
    if start.is_ipv4() != end.is_ipv4() {
        return Err(Error::Migration(format!(
            "IP version mismatch between {start} and {end}"
        )));
    }
    let bits: u32 = if start.is_ipv4() { 32 } else { 128 };
    let diff = addr_to_u128(&start) ^ addr_to_u128(&end);
    let common = diff.leading_zeros() - (128 - bits);
    let prefix = common.min(bits - 1) as u8;
    IpNet::new(start, prefix)
        .map(|net| net.trunc())
        .map_err(|e| Error::Migration(e.to_string()))
}

pub fn parse_ranges(value: &str, format: Format) -> Result<Vec<Range>, Error> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| -> Result<Range, Error> {
            match format {
                Format::Cidr => {
                    let net = IpNet::from_str(s)
                        .map_err(|e| Error::Migration(format!("invalid cidr {s}: {e}")))?;
                    Ok(Range {
                        subnet: net.trunc().to_string(),
                        ..Default::default()
                    })
                }
                Format::Range => {
                    let (start, end) = s
                        .split_once('-')
                        .ok_or_else(|| Error::Migration(format!("invalid range {s}")))?;
                    let parse = |a: &str| {
                        IpAddr::from_str(a.trim())
                            .map_err(|e| Error::Migration(format!("invalid range {s}: {e}")))
                    };
                    let (start_addr, end_addr) = (parse(start)?, parse(end)?);
                    Ok(Range {
                        subnet: common_subnet(start_addr, end_addr)?.to_string(),
                        range_start: Some(start.trim().to_string()),
                        range_end: Some(end.trim().to_string()),
                        gateway: None,
                    })
                }
            }
        })
        .collect()
}

fn make_pool(name: &str, ranges: Vec<Range>) -> IPPool {
    let scope = if name == GLOBAL_POOL_NAME {
        Vec::new()
    } else {
        vec![Tuple {
            project: ALL.to_string(),
            namespace: name.to_string(),
            guest_cluster: ALL.to_string(),
        }]
    };
    IPPool {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: IPPoolSpec {
            description: None,
            ranges,
            selector: Selector {
                scope,
                ..Default::default()
            },
        },
        status: Some(IPPoolStatus::default()),
    }
}

/// Converts the data of the legacy pool ConfigMap. The global pool comes first
/// and keys of an unknown format are skipped.
pub fn pools_from_config(data: &BTreeMap<String, String>) -> Result<Vec<IPPool>, Error> {
    let mut entries: Vec<(Format, String, &String)> = data
        .iter()
        .filter_map(|(k, v)| parse_key(k).map(|(f, n)| (f, n, v)))
        .collect();
    entries.sort_by_key(|(_, name, _)| name != GLOBAL_POOL_NAME);

    entries
        .into_iter()
        .map(|(format, name, value)| -> Result<IPPool, Error> {
            Ok(make_pool(&name, parse_ranges(value, format)?))
        })
        .collect()
}

/// Records the VIPs of `services` found in namespace `name` onto its own pool,
/// or onto the global pool when the VIP lies only there.
pub fn assign_allocations(
    pools: &mut [IPPool],
    name: &str,
    services: &KubevipServices,
) -> Result<(), Error> {
    let range_set = |pool: &IPPool| {
        RangeSet::new(&pool.range_specs()).map_err(|e| Error::Migration(e.to_string()))
    };
    let own = match pools.iter().position(|p| p.name_any() == name) {
        Some(i) => Some((i, range_set(&pools[i])?)),
        None => None,
    };
    let global = match pools.iter().position(|p| p.name_any() == GLOBAL_POOL_NAME) {
        Some(i) => Some((i, range_set(&pools[i])?)),
        None => None,
    };

    for svc in services.services.iter() {
        let Ok(vip) = IpAddr::from_str(&svc.vip) else {
            tracing::warn!(vip = svc.vip, service = svc.service_name, "Invalid kube-vip address");
            continue;
        };
        let target = match (&own, &global) {
            (Some((i, rs)), _) if rs.contains(&vip) => Some(*i),
            (_, Some((i, rs))) if rs.contains(&vip) => Some(*i),
            _ => None,
        };
        if let Some(i) = target {
            pools[i]
                .status
                .get_or_insert_with(IPPoolStatus::default)
                .allocated
                .insert(vip.to_string(), format!("{name}/{}", svc.service_name));
        }
    }
    Ok(())
}

/// Creates IPPools from the legacy kube-vip configuration. Existing pools are left untouched.
#[tracing::instrument(skip_all)]
pub async fn migrate(client: Client) -> Result<Vec<String>, Error> {
    let config_maps = Api::<ConfigMap>::namespaced(client.clone(), KUBEVIP_CONFIG_MAP_NAMESPACE);
    let Some(cm) = config_maps
        .get_opt(KUBEVIP_CONFIG_MAP)
        .await
        .map_err(Error::Kube)?
    else {
        tracing::info!("No kube-vip configuration to migrate");
        return Ok(Vec::new());
    };

    let mut pools = pools_from_config(&cm.data.unwrap_or_default())?;

    let names: Vec<String> = pools.iter().map(|p| p.name_any()).collect();
    for name in names.iter().filter(|n| n.as_str() != GLOBAL_POOL_NAME) {
        let cm = Api::<ConfigMap>::namespaced(client.clone(), name)
            .get_opt(KUBEVIP_CONFIG_MAP)
            .await
            .map_err(Error::Kube)?;
        let Some(data) = cm
            .and_then(|cm| cm.data)
            .and_then(|mut d| d.remove(KUBEVIP_SERVICES_KEY))
        else {
            continue;
        };
        let services: KubevipServices =
            serde_json::from_str(&data).map_err(Error::Serialization)?;
        assign_allocations(&mut pools, name, &services)?;
    }

    let api = Api::<IPPool>::all(client);
    let mut created = Vec::new();
    for pool in pools.into_iter() {
        let name = pool.name_any();
        if api.get_opt(&name).await.map_err(Error::Kube)?.is_some() {
            tracing::info!(name, "IPPool already exists, skip migration");
            continue;
        }
        let status = pool.status.clone().unwrap_or_default();
        let mut new = api
            .create(&PostParams::default(), &pool)
            .await
            .map_err(Error::Kube)?;
        if !status.allocated.is_empty() {
            new.status = Some(status);
            api.replace_status(
                &name,
                &PostParams::default(),
                serde_json::to_vec(&new).map_err(Error::Serialization)?,
            )
            .await
            .map_err(Error::Kube)?;
        }
        tracing::info!(name, "Migrate kube-vip pool");
        created.push(name);
    }
    Ok(created)
}
