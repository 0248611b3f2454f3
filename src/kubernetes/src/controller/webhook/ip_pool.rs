use std::{collections::BTreeMap, net::IpAddr, str::FromStr};

use actix_web::{http, web, HttpRequest, HttpResponse, Responder};
use kube::{
    api::ListParams,
    core::{
        admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
        response::StatusSummary,
        Status,
    },
    Api, Client, ResourceExt,
};
use vlbd_ipam::{
    range::RangeSet,
    selector::{Matcher, PoolSelector, Requirement},
};

use crate::{
    crd::{
        ip_pool::{IPPool, GLOBAL_IP_POOL_LABEL},
        VALUE_FALSE, VALUE_TRUE,
    },
    util::escape_slash,
};

fn ranges_of(pool: &IPPool) -> Result<RangeSet, String> {
    if pool.spec.ranges.is_empty() {
        return Err("range could not be empty".to_string());
    }
    RangeSet::new(&pool.range_specs()).map_err(|e| e.to_string())
}

/// Ranges of `pool` must be valid and overlap neither each other nor any of `others`.
pub fn check_ranges(pool: &IPPool, others: &[IPPool]) -> Result<RangeSet, String> {
    let rs = ranges_of(pool)?;
    if let Some((i, j)) = rs.self_overlap() {
        return Err(format!(
            "there are overlaps between range {} and {}",
            rs.ranges()[i],
            rs.ranges()[j]
        ));
    }
    for other in others.iter().filter(|o| o.name_any() != pool.name_any()) {
        // a broken pool cannot collide with anything
        let Ok(other_rs) = ranges_of(other) else {
            continue;
        };
        if rs.overlaps(&other_rs) {
            return Err(format!(
                "the ranges overlap with the pool {}",
                other.name_any()
            ));
        }
    }
    Ok(rs)
}

pub fn check_allocated(rs: &RangeSet, allocated: &BTreeMap<String, String>) -> Result<(), String> {
    for addr in allocated.keys() {
        let ip = IpAddr::from_str(addr).map_err(|_| format!("invalid ip string {addr}"))?;
        if !rs.contains(&ip) {
            return Err(format!("allocated IP {addr} is excluded"));
        }
    }
    Ok(())
}

/// A scope entry must not be covered by any later entry of the same pool.
pub fn check_selector_itself(pool: &IPPool) -> Result<(), String> {
    let selector = PoolSelector::from(&pool.spec.selector);
    for (i, scope) in selector.scope.iter().enumerate() {
        let rest = PoolSelector {
            priority: selector.priority,
            network: selector.network.clone(),
            scope: selector.scope[i + 1..].to_vec(),
        };
        let mut r = Requirement::from(scope);
        r.network = selector.network.clone();
        if Matcher::new(&rest).matches(&r) {
            return Err("scope overlaps".to_string());
        }
    }
    Ok(())
}

/// Non-zero priorities are unique; pools both at priority zero must not share a scope.
pub fn check_selector_with_others(pool: &IPPool, others: &[IPPool]) -> Result<(), String> {
    let selector = PoolSelector::from(&pool.spec.selector);
    for other in others.iter().filter(|o| o.name_any() != pool.name_any()) {
        let other_selector = PoolSelector::from(&other.spec.selector);
        if other_selector.priority != 0 && other_selector.priority == selector.priority {
            return Err(format!(
                "the priority could not be the same as the pool {}",
                other.name_any()
            ));
        }
        if other_selector.priority == 0 && selector.priority == 0 {
            let matcher = Matcher::new(&other_selector);
            for scope in selector.scope.iter() {
                let mut r = Requirement::from(scope);
                r.network = selector.network.clone();
                if matcher.matches(&r) {
                    return Err(format!("scope overlaps with {}", other.name_any()));
                }
            }
        }
    }
    Ok(())
}

pub fn validate_create(pool: &IPPool, others: &[IPPool]) -> Result<(), String> {
    check_ranges(pool, others)?;
    check_selector_itself(pool)?;
    check_selector_with_others(pool, others)
}

pub fn validate_update(pool: &IPPool, others: &[IPPool]) -> Result<(), String> {
    let rs = check_ranges(pool, others)?;
    check_allocated(&rs, &pool.allocated())?;
    check_selector_itself(pool)?;
    check_selector_with_others(pool, others)
}

pub fn validate_delete(pool: &IPPool) -> Result<(), String> {
    if !pool.allocated().is_empty() {
        return Err("could not delete pool before releasing all the allocated IP".to_string());
    }
    Ok(())
}

/// Patch flagging whether `pool` is the global pool. None when the label is already right.
pub fn global_label_patch(pool: &IPPool) -> Option<json_patch::Patch> {
    let value = if pool.has_global_scope() {
        VALUE_TRUE
    } else {
        VALUE_FALSE
    };
    if pool.labels().get(GLOBAL_IP_POOL_LABEL).map(|v| v.as_str()) == Some(value) {
        return None;
    }
    let op = match pool.metadata.labels {
        Some(_) => json_patch::PatchOperation::Add(json_patch::AddOperation {
            path: format!("/metadata/labels/{}", escape_slash(GLOBAL_IP_POOL_LABEL)),
            value: serde_json::Value::String(value.to_string()),
        }),
        None => json_patch::PatchOperation::Add(json_patch::AddOperation {
            path: "/metadata/labels".to_string(),
            value: serde_json::json!({ GLOBAL_IP_POOL_LABEL: value }),
        }),
    };
    Some(json_patch::Patch(vec![op]))
}

async fn list_pools() -> Result<Vec<IPPool>, kube::Error> {
    let client = Client::try_default().await?;
    Ok(Api::<IPPool>::all(client)
        .list(&ListParams::default())
        .await?
        .items)
}

#[tracing::instrument(skip_all)]
pub async fn handle_validation(
    req: HttpRequest,
    body: web::Json<AdmissionReview<IPPool>>,
) -> impl Responder {
    tracing::info!(method=?req.method(), uri=?req.uri(), "Call validating webhook for IPPool");

    if let Some(content_type) = req.head().headers.get("content-type") {
        if content_type != "application/json" {
            let msg = format!("invalid content-type: {:?}", content_type);

            return HttpResponse::BadRequest().json(msg);
        }
    }

    let admission_req: AdmissionRequest<IPPool> = match body.into_inner().try_into() {
        Ok(req) => req,
        Err(e) => {
            tracing::error!(error=?e,"Invalid request");
            return HttpResponse::InternalServerError()
                .json(&AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let mut resp = AdmissionResponse::from(&admission_req);

    let res = match (&admission_req.operation, &admission_req.object, &admission_req.old_object) {
        (Operation::Delete, _, Some(old)) => validate_delete(old),
        (Operation::Create, Some(pool), _) | (Operation::Update, Some(pool), _) => {
            let others = match list_pools().await {
                Ok(pools) => pools,
                Err(e) => {
                    tracing::error!("CRD is not queryable; {e:?}. Is the CRD installed?");
                    return HttpResponse::InternalServerError()
                        .json(&AdmissionResponse::invalid(e.to_string()).into_review());
                }
            };
            if matches!(admission_req.operation, Operation::Create) {
                validate_create(pool, &others)
            } else {
                validate_update(pool, &others)
            }
        }
        _ => Ok(()),
    };

    if let Err(reason) = res {
        tracing::warn!(name = admission_req.name, reason, "Reject IPPool");
        resp.allowed = false;
        resp.result = Status {
            status: Some(StatusSummary::Failure),
            code: http::StatusCode::FORBIDDEN.as_u16(),
            message: "Forbidden by validating webhook".to_string(),
            reason,
            details: None,
        };
        return HttpResponse::Ok().json(resp.into_review());
    }

    resp.allowed = true;
    resp.result = Status {
        status: Some(StatusSummary::Success),
        code: http::StatusCode::OK.as_u16(),
        ..Default::default()
    };

    HttpResponse::Ok().json(resp.into_review())
}

#[tracing::instrument(skip_all)]
pub async fn handle_mutation(
    req: HttpRequest,
    body: web::Json<AdmissionReview<IPPool>>,
) -> impl Responder {
    tracing::info!(method=?req.method(), uri=?req.uri(), "Call mutating webhook for IPPool");

    if let Some(content_type) = req.head().headers.get("content-type") {
        if content_type != "application/json" {
            let msg = format!("invalid content-type: {:?}", content_type);

            return HttpResponse::BadRequest().json(msg);
        }
    }

    let admission_req: AdmissionRequest<IPPool> = match body.into_inner().try_into() {
        Ok(req) => req,
        Err(e) => {
            tracing::error!(error=?e,"Invalid request");
            return HttpResponse::InternalServerError()
                .json(&AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let resp = AdmissionResponse::from(&admission_req);

    let Some(pool) = admission_req.object.as_ref() else {
        return HttpResponse::Ok().json(resp.into_review());
    };
    if pool.metadata.deletion_timestamp.is_some() {
        return HttpResponse::Ok().json(resp.into_review());
    }

    if let Some(patch) = global_label_patch(pool) {
        let resp = match resp.with_patch(patch) {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(error=?e,name=pool.name_any(), "failed to handle request");
                return HttpResponse::InternalServerError()
                    .json("failed to handle a webhook request");
            }
        };
        return HttpResponse::Ok().json(resp.into_review());
    }

    HttpResponse::Ok().json(resp.into_review())
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    use crate::{
        crd::ip_pool::{IPPoolStatus, Range, Tuple},
        fixture::test_ip_pool,
    };

    fn tuple(project: &str, namespace: &str, cluster: &str) -> Tuple {
        Tuple {
            project: project.to_string(),
            namespace: namespace.to_string(),
            guest_cluster: cluster.to_string(),
        }
    }

    fn with_scope(name: &str, subnet: &str, priority: u32, scope: Vec<Tuple>) -> IPPool {
        let mut pool = test_ip_pool(name, subnet);
        pool.spec.selector.priority = priority;
        pool.spec.selector.scope = scope;
        pool
    }

    #[test]
    fn works_check_ranges() {
        let pool = test_ip_pool("p1", "192.168.100.0/24");
        let other = test_ip_pool("p2", "192.168.200.0/24");
        assert!(check_ranges(&pool, &[other, pool.clone()]).is_ok());
    }

    #[rstest(
        ranges,
        others,
        case(vec![], vec![]),
        case(vec!["192.168.100.0/33"], vec![]),
        case(vec!["192.168.100.0/24", "192.168.100.128/25"], vec![]),
        case(vec!["192.168.100.0/24"], vec!["192.168.0.0/16"]),
    )]
    fn fails_check_ranges(ranges: Vec<&str>, others: Vec<&str>) {
        let mut pool = test_ip_pool("p1", "10.0.0.0/24");
        pool.spec.ranges = ranges
            .iter()
            .map(|s| Range {
                subnet: s.to_string(),
                ..Default::default()
            })
            .collect();
        let others: Vec<IPPool> = others
            .iter()
            .enumerate()
            .map(|(i, s)| test_ip_pool(&format!("other{i}"), s))
            .collect();
        assert!(check_ranges(&pool, &others).is_err());
    }

    #[test]
    fn works_check_allocated() {
        let rs = RangeSet::new(&test_ip_pool("p1", "192.168.100.0/24").range_specs()).unwrap();
        let inside = BTreeMap::from([("192.168.100.2".to_string(), "default/lb1".to_string())]);
        let outside = BTreeMap::from([("10.0.0.2".to_string(), "default/lb1".to_string())]);
        let invalid = BTreeMap::from([("x".to_string(), "default/lb1".to_string())]);
        assert!(check_allocated(&rs, &inside).is_ok());
        assert!(check_allocated(&rs, &outside).is_err());
        assert!(check_allocated(&rs, &invalid).is_err());
    }

    #[rstest(
        scope,
        expected,
        case(vec![tuple("*", "default", "*")], true),
        case(vec![tuple("p1", "ns1", "c1"), tuple("p1", "ns2", "c1")], true),
        case(vec![tuple("p1", "ns1", "c1"), tuple("*", "ns1", "*")], false),
        case(vec![tuple("*", "*", "*"), tuple("p1", "ns1", "c1")], false),
    )]
    fn works_check_selector_itself(scope: Vec<Tuple>, expected: bool) {
        let pool = with_scope("p1", "192.168.100.0/24", 0, scope);
        assert_eq!(expected, check_selector_itself(&pool).is_ok());
    }

    #[rstest(
        priority,
        scope,
        other_priority,
        other_scope,
        expected,
        case(10, vec![tuple("*", "default", "*")], 10, vec![tuple("*", "other", "*")], false),
        case(10, vec![tuple("*", "default", "*")], 20, vec![tuple("*", "default", "*")], true),
        case(0, vec![tuple("*", "default", "*")], 0, vec![tuple("*", "default", "*")], false),
        case(0, vec![tuple("*", "default", "*")], 0, vec![tuple("*", "other", "*")], true),
        case(0, vec![tuple("*", "default", "*")], 10, vec![tuple("*", "default", "*")], true),
    )]
    fn works_check_selector_with_others(
        priority: u32,
        scope: Vec<Tuple>,
        other_priority: u32,
        other_scope: Vec<Tuple>,
        expected: bool,
    ) {
        let pool = with_scope("p1", "192.168.100.0/24", priority, scope);
        let other = with_scope("p2", "192.168.200.0/24", other_priority, other_scope);
        assert_eq!(
            expected,
            check_selector_with_others(&pool, &[other, pool.clone()]).is_ok()
        );
    }

    #[test]
    fn works_validate_update_and_delete() {
        let mut pool = test_ip_pool("p1", "192.168.100.0/24");
        pool.status = Some(IPPoolStatus {
            allocated: BTreeMap::from([(
                "192.168.100.2".to_string(),
                "default/lb1".to_string(),
            )]),
            ..Default::default()
        });
        assert!(validate_update(&pool, &[]).is_ok());
        assert!(validate_delete(&pool).is_err());

        pool.spec.ranges[0].subnet = "192.168.200.0/24".to_string();
        assert!(validate_update(&pool, &[]).is_err());
        // create ignores the ledger
        assert!(validate_create(&pool, &[]).is_ok());

        pool.status = None;
        assert!(validate_delete(&pool).is_ok());
    }

    #[test]
    fn works_global_label_patch() {
        let mut pool = with_scope("p1", "192.168.100.0/24", 0, vec![tuple("*", "*", "*")]);
        pool.metadata.labels = None;
        let patch = global_label_patch(&pool).unwrap();
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            serde_json::json!([{
                "op": "add",
                "path": "/metadata/labels",
                "value": { GLOBAL_IP_POOL_LABEL: "true" },
            }]),
            value
        );

        pool.metadata.labels = Some(BTreeMap::from([(
            GLOBAL_IP_POOL_LABEL.to_string(),
            "true".to_string(),
        )]));
        assert!(global_label_patch(&pool).is_none());

        pool.spec.selector.scope = vec![tuple("*", "default", "*")];
        let patch = global_label_patch(&pool).unwrap();
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            serde_json::json!([{
                "op": "add",
                "path": "/metadata/labels/loadbalancer.harvesterhci.io~1global-ip-pool",
                "value": "false",
            }]),
            value
        );
    }
}
