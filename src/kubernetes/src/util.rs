use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{core::ApiResource, Resource, ResourceExt};

use super::error::Error;

pub fn create_owner_reference<T: Resource<DynamicType = ()>>(owner: &T) -> OwnerReference {
    let res = ApiResource::erase::<T>(&());
    OwnerReference {
        name: owner.name_any(),
        api_version: res.api_version,
        kind: res.kind,
        uid: match &owner.meta().uid {
            Some(uid) => uid.clone(),
            None => "".to_string(),
        },
        block_owner_deletion: Some(true),
        controller: Some(true),
    }
}

pub fn get_namespace<T: Resource<DynamicType = ()>>(resource: &T) -> Result<String, Error> {
    resource.namespace().ok_or(Error::GetNamespace)
}

/// `<namespace>/<name>`, used as allocation owner and probe group id.
pub fn get_namespaced_name<T: Resource<DynamicType = ()>>(resource: &T) -> String {
    match resource.namespace() {
        Some(ns) => format!("{ns}/{}", resource.name_any()),
        None => resource.name_any(),
    }
}

pub fn split_namespaced_name(uid: &str) -> Result<(String, String), Error> {
    match uid.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((ns.to_string(), name.to_string()))
        }
        _ => Err(Error::InvalidUid(uid.to_string())),
    }
}

/// Splits `<ip>:<port>`. IPv6 hosts are accepted with or without brackets.
pub fn split_probe_address(address: &str) -> Result<(String, u16), Error> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidProbeAddress(address.to_string()))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| Error::InvalidProbeAddress(address.to_string()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(Error::InvalidProbeAddress(address.to_string()));
    }
    Ok((host.to_string(), port))
}

/// Escapes `s` as a JSON pointer segment.
pub fn escape_slash(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest(
        uid,
        expected,
        case("default/lb1", Ok(("default".to_string(), "lb1".to_string()))),
        case("default", Err(Error::InvalidUid("default".to_string()))),
        case("a/b/c", Err(Error::InvalidUid("a/b/c".to_string()))),
        case("/lb1", Err(Error::InvalidUid("/lb1".to_string()))),
    )]
    fn works_split_namespaced_name(uid: &str, expected: Result<(String, String), Error>) {
        assert_eq!(expected, split_namespaced_name(uid));
    }

    #[rstest(
        address,
        expected,
        case("10.52.0.214:80", Ok(("10.52.0.214".to_string(), 80))),
        case("[fd00::1]:8080", Ok(("fd00::1".to_string(), 8080))),
        case("10.52.0.214", Err(Error::InvalidProbeAddress("10.52.0.214".to_string()))),
        case("10.52.0.214:http", Err(Error::InvalidProbeAddress("10.52.0.214:http".to_string()))),
    )]
    fn works_split_probe_address(address: &str, expected: Result<(String, u16), Error>) {
        assert_eq!(expected, split_probe_address(address));
    }

    #[test]
    fn works_escape_slash() {
        assert_eq!(
            "loadbalancer.harvesterhci.io~1namespace",
            escape_slash("loadbalancer.harvesterhci.io/namespace")
        );
    }
}
