use crate::{
    core::{Candidate, Decision, GroupKind, Outcome},
    index::validate,
    k8s::{self, DynamicObject, Labels, Resource, ResourceExt},
    Engine,
};
use anyhow::{anyhow, Result};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::core::admission::Operation;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Admits `DependencyRule` resources that can be enforced, and every other
/// resource whose dependencies are met.
#[derive(Clone)]
pub struct Admission {
    engine: Arc<Engine>,
    reports: mpsc::Sender<Decision>,
    metrics: AdmissionMetrics,
}

#[derive(Clone, Debug)]
pub struct AdmissionMetrics {
    decisions: Family<DecisionLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct DecisionLabels {
    outcome: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type Review = kube::core::admission::AdmissionReview<DynamicObject>;
type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;
type AdmissionReview = kube::core::admission::AdmissionReview<DynamicObject>;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let decisions = Family::default();
        prom.register(
            "decisions",
            "Count of admission decisions by outcome",
            decisions.clone(),
        );
        Self { decisions }
    }

    fn inc(&self, outcome: Outcome) {
        self.decisions
            .get_or_create(&DecisionLabels {
                outcome: outcome.as_str().to_string(),
            })
            .inc();
    }
}

// === impl Admission ===

impl tower::Service<Request<hyper::body::Incoming>> for Admission {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        if req.method() != http::Method::POST || req.uri().path() != "/" {
            return Box::pin(future::ok(
                Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(Body::default())
                    .expect("not found response must be valid"),
            ));
        }

        let admission = self.clone();
        Box::pin(async move {
            use bytes::Buf;
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: Review = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };
            trace!(?review);

            let rsp = match review.try_into() {
                Ok(req) => {
                    debug!(?req);
                    admission.admit(req)
                }
                Err(error) => {
                    warn!(%error, "Invalid admission request");
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(?rsp);
            json_response(rsp.into_review())
        })
    }
}

impl Admission {
    pub(crate) fn new(
        engine: Engine,
        reports: mpsc::Sender<Decision>,
        metrics: AdmissionMetrics,
    ) -> Self {
        Self {
            engine: Arc::new(engine),
            reports,
            metrics,
        }
    }

    fn admit(&self, req: AdmissionRequest) -> AdmissionResponse {
        if is_kind::<k8s::DependencyRule>(&req) {
            return self.admit_rule(req);
        }

        let rsp = AdmissionResponse::from(&req);
        if !matches!(req.operation, Operation::Create | Operation::Update) {
            return rsp;
        }
        let Some(candidate) = candidate(&req) else {
            return rsp;
        };

        let decision = self.engine.decide(&candidate);
        self.metrics.inc(decision.outcome);
        let rsp = respond(rsp, &decision);
        if decision.outcome == Outcome::Deny {
            info!(kind = %candidate.group_kind, name = %candidate.name, ns = ?candidate.namespace, "Denied");
        }

        // Dry runs must not have side effects.
        if !req.dry_run && !decision.evaluated.is_empty() {
            if let Err(error) = self.reports.try_send(decision) {
                debug!(%error, "Dropped decision report");
            }
        }
        rsp
    }

    fn admit_rule(&self, req: AdmissionRequest) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);
        if !matches!(req.operation, Operation::Create | Operation::Update) {
            return rsp;
        }

        let (obj, spec) = match parse_spec::<k8s::DependencyRuleSpec>(req) {
            Ok(spec) => spec,
            Err(error) => {
                info!(%error, "Failed to parse DependencyRule spec");
                return rsp.deny(error);
            }
        };

        let ns = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        if let Err(error) = validate::rule(&ns, &name, &spec) {
            info!(%error, %ns, %name, "Denied DependencyRule");
            return rsp.deny(error);
        }
        rsp
    }
}

/// Describes the object under admission.
///
/// Returns `None` for requests that carry no object.
fn candidate(req: &AdmissionRequest) -> Option<Candidate> {
    let obj = req.object.as_ref()?;
    let name = obj
        .metadata
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| req.name.clone());
    let namespace = req
        .namespace
        .clone()
        .or_else(|| obj.metadata.namespace.clone())
        .filter(|ns| !ns.is_empty());

    Some(Candidate {
        group_kind: GroupKind::new(&req.kind.group, &req.kind.kind),
        name,
        namespace,
        labels: Labels::from(obj.metadata.labels.clone()),
    })
}

fn respond(rsp: AdmissionResponse, decision: &Decision) -> AdmissionResponse {
    let reasons = || decision.reasons.iter().map(ToString::to_string);
    match decision.outcome {
        Outcome::Allow => rsp,
        Outcome::AllowWithWarning => {
            let mut rsp = rsp;
            rsp.warnings = Some(reasons().collect());
            rsp
        }
        Outcome::Deny => rsp.deny(reasons().collect::<Vec<_>>().join("; ")),
    }
}

fn is_kind<T>(req: &AdmissionRequest) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    req.kind.group.eq_ignore_ascii_case(&T::group(&dt))
        && req.kind.kind.eq_ignore_ascii_case(&T::kind(&dt))
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}

fn parse_spec<T: DeserializeOwned>(req: AdmissionRequest) -> Result<(DynamicObject, T)> {
    let obj = req
        .object
        .ok_or_else(|| anyhow!("admission request missing 'object'"))?;

    let spec = {
        let data = obj
            .data
            .get("spec")
            .cloned()
            .ok_or_else(|| anyhow!("admission request missing 'spec'"))?;
        serde_json::from_value(data)?
    };

    Ok((obj, spec))
}
