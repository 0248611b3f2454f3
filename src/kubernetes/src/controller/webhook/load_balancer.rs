use std::collections::{BTreeMap, HashMap, HashSet};

use actix_web::{http, web, HttpRequest, HttpResponse, Responder};
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    core::{
        admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
        response::StatusSummary,
        Status,
    },
    Api, Client, ResourceExt,
};

use crate::crd::load_balancer::{LoadBalancer, ANNOTATION_NAMESPACE, ANNOTATION_PROJECT};

pub const PROJECT_ID_ANNOTATION: &str = "field.cattle.io/projectId";

const MAX_PORT: i32 = 65535;

pub fn check_listeners(lb: &LoadBalancer) -> Result<(), String> {
    let mut names: HashSet<&str> = HashSet::new();
    let mut ports: HashMap<i32, &str> = HashMap::new();
    let mut backend_ports: HashMap<i32, &str> = HashMap::new();

    for l in lb.spec.listeners.iter() {
        if !names.insert(l.name.as_str()) {
            return Err(format!("listener has duplicate name {}", l.name));
        }
        for (kind, port) in [("port", l.port), ("backend port", l.backend_port)] {
            if !(1..=MAX_PORT).contains(&port) {
                return Err(format!(
                    "listener {} has invalid {kind} {port}, must be in 1-{MAX_PORT}",
                    l.name
                ));
            }
        }
        if let Some(other) = ports.insert(l.port, l.name.as_str()) {
            return Err(format!(
                "listener {} has duplicate port {} with listener {other}",
                l.name, l.port
            ));
        }
        if let Some(other) = backend_ports.insert(l.backend_port, l.name.as_str()) {
            return Err(format!(
                "listener {} has duplicate backend port {} with listener {other}",
                l.name, l.backend_port
            ));
        }
    }

    if let Some(hc) = lb.health_check() {
        if !lb
            .spec
            .listeners
            .iter()
            .any(|l| l.backend_port as i64 == hc.port as i64)
        {
            return Err(format!(
                "health check port {} is not a backend port of any listener",
                hc.port
            ));
        }
    }
    Ok(())
}

pub fn validate_update(old: &LoadBalancer, new: &LoadBalancer) -> Result<(), String> {
    if new.metadata.deletion_timestamp.is_some() {
        return Ok(());
    }
    if old.spec.ipam != new.spec.ipam {
        return Err(format!(
            "ipam could not be changed from {} to {}",
            old.spec.ipam, new.spec.ipam
        ));
    }
    check_listeners(new)
}

/// `c-xxx:p-yyy` becomes `c-xxx/p-yyy`.
pub fn project_of(namespace: &Namespace) -> String {
    namespace
        .annotations()
        .get(PROJECT_ID_ANNOTATION)
        .map(|p| p.replacen(':', "/", 1))
        .unwrap_or_default()
}

/// Patch setting the namespace and project requirement annotations of `lb`.
pub fn annotations_patch(lb: &LoadBalancer, project: &str) -> Option<json_patch::Patch> {
    let mut annotations: BTreeMap<String, String> =
        lb.metadata.annotations.clone().unwrap_or_default();
    let before = annotations.clone();
    annotations.insert(
        ANNOTATION_NAMESPACE.to_string(),
        lb.namespace().unwrap_or_default(),
    );
    annotations.insert(ANNOTATION_PROJECT.to_string(), project.to_string());
    if lb.metadata.annotations.is_some() && annotations == before {
        return None;
    }

    let value = serde_json::to_value(&annotations).ok()?;
    Some(json_patch::Patch(vec![json_patch::PatchOperation::Add(
        json_patch::AddOperation {
            path: "/metadata/annotations".to_string(),
            value,
        },
    )]))
}

fn forbidden(mut resp: AdmissionResponse, reason: String) -> HttpResponse {
    resp.allowed = false;
    resp.result = Status {
        status: Some(StatusSummary::Failure),
        code: http::StatusCode::FORBIDDEN.as_u16(),
        message: "Forbidden by validating webhook".to_string(),
        reason,
        details: None,
    };
    HttpResponse::Ok().json(resp.into_review())
}

#[tracing::instrument(skip_all)]
pub async fn handle_validation(
    req: HttpRequest,
    body: web::Json<AdmissionReview<LoadBalancer>>,
) -> impl Responder {
    tracing::info!(method=?req.method(), uri=?req.uri(), "Call validating webhook for LoadBalancer");

    if let Some(content_type) = req.head().headers.get("content-type") {
        if content_type != "application/json" {
            let msg = format!("invalid content-type: {:?}", content_type);

            return HttpResponse::BadRequest().json(msg);
        }
    }

    let admission_req: AdmissionRequest<LoadBalancer> = match body.into_inner().try_into() {
        Ok(req) => req,
        Err(e) => {
            tracing::error!(error=?e,"Invalid request");
            return HttpResponse::InternalServerError()
                .json(&AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let mut resp = AdmissionResponse::from(&admission_req);

    let res = match (&admission_req.operation, &admission_req.object, &admission_req.old_object) {
        (Operation::Create, Some(lb), _) => check_listeners(lb),
        (Operation::Update, Some(lb), Some(old)) => validate_update(old, lb),
        _ => Ok(()),
    };
    if let Err(reason) = res {
        tracing::warn!(
            name = admission_req.name,
            namespace = ?admission_req.namespace,
            reason,
            "Reject LoadBalancer"
        );
        return forbidden(resp, reason);
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
    body: web::Json<AdmissionReview<LoadBalancer>>,
) -> impl Responder {
    tracing::info!(method=?req.method(), uri=?req.uri(), "Call mutating webhook for LoadBalancer");

    if let Some(content_type) = req.head().headers.get("content-type") {
        if content_type != "application/json" {
            let msg = format!("invalid content-type: {:?}", content_type);

            return HttpResponse::BadRequest().json(msg);
        }
    }

    let admission_req: AdmissionRequest<LoadBalancer> = match body.into_inner().try_into() {
        Ok(req) => req,
        Err(e) => {
            tracing::error!(error=?e,"Invalid request");
            return HttpResponse::InternalServerError()
                .json(&AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let resp = AdmissionResponse::from(&admission_req);

    let Some(lb) = admission_req.object.as_ref() else {
        return HttpResponse::Ok().json(resp.into_review());
    };
    if lb.metadata.deletion_timestamp.is_some() {
        return HttpResponse::Ok().json(resp.into_review());
    }

    let namespace = lb
        .namespace()
        .or_else(|| admission_req.namespace.clone())
        .unwrap_or_default();
    let project = match get_namespace(&namespace).await {
        Ok(ns) => project_of(&ns),
        Err(e) => {
            tracing::error!(error=?e, namespace, "failed to get namespace");
            return HttpResponse::InternalServerError()
                .json(&AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let mut lb = lb.clone();
    lb.metadata.namespace = Some(namespace);
    if let Some(patch) = annotations_patch(&lb, &project) {
        let resp = match resp.with_patch(patch) {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(error=?e,name=lb.name_any(), "failed to handle request");
                return HttpResponse::InternalServerError()
                    .json("failed to handle a webhook request");
            }
        };
        return HttpResponse::Ok().json(resp.into_review());
    }

    HttpResponse::Ok().json(resp.into_review())
}

async fn get_namespace(name: &str) -> Result<Namespace, kube::Error> {
    let client = Client::try_default().await?;
    Api::<Namespace>::all(client).get(name).await
}
