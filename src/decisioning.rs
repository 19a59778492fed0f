//! Decisioning orchestrator: turns one delivery request plus the current
//! artifact snapshot into a structured response, queueing display
//! notifications and telemetry for async dispatch along the way.

use crate::artifact::{Consequence, Rule, RuleArtifact};
use crate::cluster::{location_hint_to_node_details, ClusterLocator};
use crate::collators::{
    CustomParamsCollator, GeoParamsCollator, PageParamsCollator, ParamsCollator,
    TimeParamsCollator, UserParamsCollator, CONTEXT_KEY_CUSTOM, CONTEXT_KEY_GEO,
    CONTEXT_KEY_PAGE, CONTEXT_KEY_REFERRING, CONTEXT_KEY_USER,
};
use crate::config::ClientConfig;
use crate::delivery::{
    AuthenticatedState, DeliveryRequest, DeliveryResponse, ExecuteResponse, MboxResponse,
    Notification, NotificationMbox, NotificationPageLoad, NotificationView, PageLoadResponse,
    PrefetchResponse, RequestDetails, TelemetryEntry, TelemetryFeatures, ViewResponse, VisitorId,
};
use crate::errors::SharedReporter;
use crate::evaluability::{evaluate_local_execution, LocalExecutionVerdict};
use crate::executor::{RuleExecutor, TraceAccumulator};
use crate::geo::SharedGeoResolver;
use crate::loader::ArtifactLoader;
use crate::notifications::NotificationDispatcher;
use crate::remote::SharedCaller;
use rand::Rng;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub const STATUS_OK: u16 = 200;
pub const STATUS_PARTIAL_CONTENT: u16 = 206;
pub const STATUS_SERVICE_UNAVAILABLE: u16 = 503;

const NOTIFICATION_TYPE_DISPLAY: &str = "display";
const DECISIONING_METHOD_ON_DEVICE: &str = "on-device";

/// What the caller gets back: the response body plus the routing verdict the
/// transport layer needs for any remote fallback.
#[derive(Debug, Clone)]
pub struct DecisioningResponse {
    pub status: u16,
    pub message: String,
    pub response: DeliveryResponse,
    pub global_mbox: Option<String>,
    pub remote_mboxes: Vec<String>,
    pub remote_views: Vec<String>,
}

pub struct DecisioningService {
    config: Arc<ClientConfig>,
    loader: Arc<ArtifactLoader>,
    executor: RuleExecutor,
    dispatcher: NotificationDispatcher,
    cluster: ClusterLocator,
    caller: SharedCaller,
    geo_resolver: Option<SharedGeoResolver>,
}

impl DecisioningService {
    pub fn new(
        config: Arc<ClientConfig>,
        caller: SharedCaller,
        reporter: SharedReporter,
        geo_resolver: Option<SharedGeoResolver>,
    ) -> Self {
        let loader = Arc::new(ArtifactLoader::new(config.clone(), reporter.clone()));
        let executor = RuleExecutor::new(config.client.clone(), reporter);
        let dispatcher = NotificationDispatcher::new(caller.clone());
        DecisioningService {
            config,
            loader,
            executor,
            dispatcher,
            cluster: ClusterLocator::new(),
            caller,
            geo_resolver,
        }
    }

    /// Begin background work: artifact polling and cluster-hint discovery.
    pub fn start(&self) {
        self.loader.start();
        self.cluster.start(self.caller.clone());
    }

    pub fn stop(&self) {
        self.loader.stop();
        self.cluster.stop();
    }

    pub async fn refresh_rules(&self) {
        self.loader.refresh().await;
    }

    pub fn loader(&self) -> &ArtifactLoader {
        &self.loader
    }

    /// Classification only, without evaluating anything.
    pub fn evaluate_local_execution(&self, request: &DeliveryRequest) -> LocalExecutionVerdict {
        evaluate_local_execution(request, self.loader.latest().as_deref())
    }

    pub async fn execute_request(&self, mut request: DeliveryRequest) -> DecisioningResponse {
        let started = Instant::now();
        let request_id = request
            .request_id
            .clone()
            .unwrap_or_else(random_uuid);

        let Some(artifact) = self.loader.latest() else {
            return DecisioningResponse {
                status: STATUS_SERVICE_UNAVAILABLE,
                message: "Rule artifact not yet available".to_string(),
                response: DeliveryResponse {
                    status: STATUS_SERVICE_UNAVAILABLE,
                    request_id: Some(request_id),
                    client: Some(self.config.client.clone()),
                    id: request.id.clone(),
                    ..Default::default()
                },
                global_mbox: None,
                remote_mboxes: Vec::new(),
                remote_views: Vec::new(),
            };
        };

        self.resolve_geo_if_needed(&mut request, &artifact).await;

        let verdict = evaluate_local_execution(&request, Some(artifact.as_ref()));
        let status = if verdict.all_local {
            STATUS_OK
        } else {
            STATUS_PARTIAL_CONTENT
        };
        let message = if verdict.all_local {
            "Local-decisioning response".to_string()
        } else {
            verdict
                .reason
                .clone()
                .unwrap_or_else(|| "Partial local-decisioning response".to_string())
        };

        let mut response = DeliveryResponse {
            status,
            request_id: Some(request_id.clone()),
            client: Some(self.config.client.clone()),
            id: request.id.clone(),
            ..Default::default()
        };

        let visitor_id = self.resolve_visitor_id(&request, &mut response);
        let request_context = self.collate_request_context(&request);
        let property_token = request
            .property_token()
            .or(self.config.default_property_token.as_deref())
            .map(str::to_string);

        let mut notifications = Vec::new();
        let mut prefetch_response = PrefetchResponse::default();
        let mut execute_response = ExecuteResponse::default();
        self.handle_prefetch(
            &request,
            &artifact,
            &request_context,
            &visitor_id,
            property_token.as_deref(),
            &mut prefetch_response,
        );
        self.handle_execute(
            &request,
            &artifact,
            &request_context,
            &visitor_id,
            property_token.as_deref(),
            &mut execute_response,
            &mut notifications,
        );
        response.prefetch = Some(prefetch_response);
        response.execute = Some(execute_response);

        let telemetry = self.telemetry_entry(&request_id, started);
        self.dispatcher.dispatch(
            self.notification_request(&request, &response),
            notifications,
            telemetry,
        );

        DecisioningResponse {
            status,
            message,
            response,
            global_mbox: verdict.global_mbox,
            remote_mboxes: verdict.remote_mboxes,
            remote_views: verdict.remote_views,
        }
    }

    async fn resolve_geo_if_needed(&self, request: &mut DeliveryRequest, artifact: &RuleArtifact) {
        if !artifact.geo_targeting_enabled {
            return;
        }
        let Some(resolver) = &self.geo_resolver else {
            return;
        };
        let Some(context) = request.context.as_mut() else {
            return;
        };
        let Some(geo) = context.geo.as_ref() else {
            return;
        };
        if !geo.needs_resolution() {
            return;
        }
        let ip = geo.ip_address.clone().unwrap_or_default();
        if let Some(resolved) = resolver.lookup(&ip).await {
            context.geo = Some(resolved);
        }
    }

    /// Request-level facts: clock facts at the top level, user and geo as
    /// namespaces. Detail-level namespaces are layered on per detail.
    fn collate_request_context(&self, request: &DeliveryRequest) -> Map<String, Value> {
        let mut context = TimeParamsCollator.collate(request, None);
        context.insert(
            CONTEXT_KEY_USER.to_string(),
            Value::Object(UserParamsCollator.collate(request, None)),
        );
        context.insert(
            CONTEXT_KEY_GEO.to_string(),
            Value::Object(GeoParamsCollator.collate(request, None)),
        );
        context
    }

    fn detail_context(
        &self,
        request: &DeliveryRequest,
        request_context: &Map<String, Value>,
        details: &RequestDetails<'_>,
    ) -> Map<String, Value> {
        let mut context = request_context.clone();
        context.insert(
            CONTEXT_KEY_PAGE.to_string(),
            Value::Object(PageParamsCollator::page().collate(request, Some(details))),
        );
        context.insert(
            CONTEXT_KEY_REFERRING.to_string(),
            Value::Object(PageParamsCollator::referring().collate(request, Some(details))),
        );
        context.insert(
            CONTEXT_KEY_CUSTOM.to_string(),
            Value::Object(CustomParamsCollator.collate(request, Some(details))),
        );
        context
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_prefetch(
        &self,
        request: &DeliveryRequest,
        artifact: &RuleArtifact,
        request_context: &Map<String, Value>,
        visitor_id: &str,
        property_token: Option<&str>,
        prefetch_response: &mut PrefetchResponse,
    ) {
        let Some(prefetch) = &request.prefetch else {
            return;
        };

        for mbox in &prefetch.mboxes {
            let details = RequestDetails::Mbox(mbox);
            let (consequences, trace) = self.evaluate_detail(
                request,
                artifact,
                request_context,
                visitor_id,
                property_token,
                &details,
            );
            let mut entry = MboxResponse {
                name: mbox.name.clone(),
                index: mbox.index,
                trace,
                ..Default::default()
            };
            for consequence in consequences {
                entry.options.extend(consequence.options);
                entry.metrics.extend(consequence.metrics);
            }
            prefetch_response.mboxes.push(entry);
        }

        for view in &prefetch.views {
            let details = RequestDetails::View(view);
            let (consequences, trace) = self.evaluate_detail(
                request,
                artifact,
                request_context,
                visitor_id,
                property_token,
                &details,
            );
            merge_view_consequences(
                &mut prefetch_response.views,
                view.name.as_deref(),
                view.key.as_deref(),
                consequences,
                trace,
            );
        }

        if let Some(page_load) = &prefetch.page_load {
            let details = RequestDetails::PageLoad(page_load);
            let (consequences, trace) = self.evaluate_detail(
                request,
                artifact,
                request_context,
                visitor_id,
                property_token,
                &details,
            );
            let mut entry = PageLoadResponse {
                trace,
                ..Default::default()
            };
            for consequence in consequences {
                entry.options.extend(consequence.options);
                entry.metrics.extend(consequence.metrics);
            }
            prefetch_response.page_load = Some(entry);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_execute(
        &self,
        request: &DeliveryRequest,
        artifact: &RuleArtifact,
        request_context: &Map<String, Value>,
        visitor_id: &str,
        property_token: Option<&str>,
        execute_response: &mut ExecuteResponse,
        notifications: &mut Vec<Notification>,
    ) {
        let Some(execute) = &request.execute else {
            return;
        };

        for mbox in &execute.mboxes {
            let details = RequestDetails::Mbox(mbox);
            let (consequences, trace) = self.evaluate_detail(
                request,
                artifact,
                request_context,
                visitor_id,
                property_token,
                &details,
            );
            let mut entry = MboxResponse {
                name: mbox.name.clone(),
                index: mbox.index,
                trace,
                ..Default::default()
            };
            for mut consequence in consequences {
                notifications.push(display_notification(
                    &consequence,
                    Some(NotificationMbox {
                        name: mbox.name.clone(),
                    }),
                    None,
                    None,
                ));
                // Execute already implies display; the host must not be able
                // to notify the same impression twice.
                strip_event_tokens(&mut consequence);
                entry.options.extend(consequence.options);
                entry.metrics.extend(consequence.metrics);
            }
            execute_response.mboxes.push(entry);
        }

        if let Some(page_load) = &execute.page_load {
            let details = RequestDetails::PageLoad(page_load);
            let (consequences, trace) = self.evaluate_detail(
                request,
                artifact,
                request_context,
                visitor_id,
                property_token,
                &details,
            );
            let mut entry = PageLoadResponse {
                trace,
                ..Default::default()
            };
            for mut consequence in consequences {
                notifications.push(display_notification(
                    &consequence,
                    None,
                    None,
                    Some(NotificationPageLoad {}),
                ));
                strip_event_tokens(&mut consequence);
                entry.options.extend(consequence.options);
                entry.metrics.extend(consequence.metrics);
            }
            execute_response.page_load = Some(entry);
        }
    }

    /// Evaluate one request detail: select the applicable rule subset, apply
    /// the property filter and `ruleKey` de-duplication, and scan in
    /// artifact order. Named mboxes stop at the first match unless
    /// configured for all-matches; views and the page load host several
    /// concurrent activities and always collect every match.
    fn evaluate_detail(
        &self,
        request: &DeliveryRequest,
        artifact: &RuleArtifact,
        request_context: &Map<String, Value>,
        visitor_id: &str,
        property_token: Option<&str>,
        details: &RequestDetails<'_>,
    ) -> (Vec<Consequence>, Option<Value>) {
        let rules: Vec<&Rule> = match details {
            RequestDetails::Mbox(mbox) => artifact.rules_for_mbox(&mbox.name).collect(),
            RequestDetails::View(view) => artifact.rules_for_view(view.name.as_deref()).collect(),
            RequestDetails::PageLoad(_) => {
                artifact.rules_for_mbox(&artifact.global_mbox).collect()
            }
        };
        let collect_all = match details {
            RequestDetails::Mbox(mbox) => {
                self.config.all_matching_rules_mboxes.contains(&mbox.name)
            }
            RequestDetails::View(_) | RequestDetails::PageLoad(_) => true,
        };

        let mut context = self.detail_context(request, request_context, details);
        let mut trace = request.trace.is_some().then(TraceAccumulator::default);
        let mut handled_rule_keys: HashSet<String> = HashSet::new();
        let mut consequences = Vec::new();

        for rule in rules {
            if !property_allows(rule, property_token) {
                continue;
            }
            if let Some(rule_key) = &rule.meta.rule_key {
                if handled_rule_keys.contains(rule_key) {
                    continue;
                }
            }

            let matched = self.executor.execute_rule(
                &mut context,
                details,
                visitor_id,
                rule,
                &artifact.response_tokens,
                trace.as_mut(),
            );

            if let Some(consequence) = matched {
                if let Some(rule_key) = &rule.meta.rule_key {
                    handled_rule_keys.insert(rule_key.clone());
                }
                consequences.push(consequence);
                if !collect_all {
                    break;
                }
            }
        }

        let trace = trace.map(|accumulator| {
            json!({
                "clientCode": &self.config.client,
                "artifact": {
                    "version": &artifact.version,
                    "meta": &artifact.meta,
                },
                "campaigns": accumulator.campaigns,
            })
        });
        (consequences, trace)
    }

    /// Identity precedence: explicit third-party id, then an authenticated
    /// customer id, then the marketing-cloud id, then an id carried on the
    /// request from an earlier call. Only when all are absent is a fresh id
    /// generated (cluster-hinted when known) and written onto the response.
    fn resolve_visitor_id(
        &self,
        request: &DeliveryRequest,
        response: &mut DeliveryResponse,
    ) -> String {
        let visitor = request.id.as_ref();

        if let Some(id) = visitor.and_then(|v| non_blank(v.third_party_id.as_deref())) {
            return id.to_string();
        }
        if let Some(id) = visitor.and_then(first_authenticated_customer_id) {
            return id;
        }
        if let Some(id) = visitor.and_then(|v| non_blank(v.marketing_cloud_visitor_id.as_deref()))
        {
            return id.to_string();
        }
        if let Some(id) = visitor.and_then(|v| non_blank(v.tnt_id.as_deref())) {
            return strip_location_hint(id).to_string();
        }

        let mut new_tnt_id = random_uuid();
        if let Some(hint) = self.cluster.location_hint() {
            new_tnt_id = format!("{new_tnt_id}.{}", location_hint_to_node_details(&hint));
        }
        let mut visitor_id = visitor.cloned().unwrap_or_default();
        visitor_id.tnt_id = Some(new_tnt_id.clone());
        response.id = Some(visitor_id);
        strip_location_hint(&new_tnt_id).to_string()
    }

    fn telemetry_entry(&self, request_id: &str, started: Instant) -> Vec<TelemetryEntry> {
        if !self.config.telemetry_enabled {
            return Vec::new();
        }
        vec![TelemetryEntry {
            request_id: Some(request_id.to_string()),
            timestamp: now_millis(),
            execution: started.elapsed().as_millis() as u64,
            features: Some(TelemetryFeatures {
                decisioning_method: Some(DECISIONING_METHOD_ON_DEVICE.to_string()),
            }),
        }]
    }

    /// Skeleton request for the notification/telemetry side channel.
    fn notification_request(
        &self,
        request: &DeliveryRequest,
        response: &DeliveryResponse,
    ) -> DeliveryRequest {
        DeliveryRequest {
            request_id: Some(random_uuid()),
            impression_id: Some(random_uuid()),
            id: request.id.clone().or_else(|| response.id.clone()),
            context: request.context.clone(),
            property: request.property.clone(),
            environment_id: request.environment_id,
            trace: request.trace.clone(),
            ..Default::default()
        }
    }
}

fn property_allows(rule: &Rule, request_token: Option<&str>) -> bool {
    match (&rule.meta.property_tokens, request_token) {
        (Some(tokens), Some(token)) if !tokens.is_empty() => tokens.contains(token),
        // Absence of a token on either side is not a mismatch.
        _ => true,
    }
}

fn merge_view_consequences(
    views: &mut Vec<ViewResponse>,
    request_name: Option<&str>,
    key: Option<&str>,
    consequences: Vec<Consequence>,
    mut trace: Option<Value>,
) {
    // A view with no matches still gets its (empty) entry.
    if consequences.is_empty() {
        ensure_view_entry(views, request_name, key, trace.take());
        return;
    }
    // Same-named view entries merge by union-append instead of duplicating.
    // A wildcard request carries no name of its own, so each consequence's
    // name decides which entry it lands in.
    for consequence in consequences {
        let entry_name = consequence.name.as_deref().or(request_name);
        let index = ensure_view_entry(views, entry_name, key, trace.take());
        views[index].options.extend(consequence.options);
        views[index].metrics.extend(consequence.metrics);
    }
}

fn ensure_view_entry(
    views: &mut Vec<ViewResponse>,
    name: Option<&str>,
    key: Option<&str>,
    trace: Option<Value>,
) -> usize {
    if let Some(index) = views.iter().position(|view| view.name.as_deref() == name) {
        if views[index].trace.is_none() && trace.is_some() {
            views[index].trace = trace;
        }
        return index;
    }
    views.push(ViewResponse {
        name: name.map(str::to_string),
        key: key.map(str::to_string),
        trace,
        ..Default::default()
    });
    views.len() - 1
}

fn strip_event_tokens(consequence: &mut Consequence) {
    for option in &mut consequence.options {
        option.event_token = None;
    }
}

fn display_notification(
    consequence: &Consequence,
    mbox: Option<NotificationMbox>,
    view: Option<NotificationView>,
    page_load: Option<NotificationPageLoad>,
) -> Notification {
    let tokens = consequence
        .options
        .iter()
        .filter_map(|option| option.event_token.clone())
        .collect();
    Notification {
        id: random_uuid(),
        impression_id: Some(random_uuid()),
        notification_type: NOTIFICATION_TYPE_DISPLAY.to_string(),
        timestamp: now_millis(),
        tokens,
        mbox,
        view,
        page_load,
    }
}

fn first_authenticated_customer_id(visitor: &VisitorId) -> Option<String> {
    visitor
        .customer_ids
        .iter()
        .find(|customer| {
            !customer.id.is_empty()
                && customer.authenticated_state == Some(AuthenticatedState::Authenticated)
        })
        .map(|customer| customer.id.clone())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn strip_location_hint(tnt_id: &str) -> &str {
    match tnt_id.find('.') {
        Some(index) if index > 0 => &tnt_id[..index],
        _ => tnt_id,
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn random_uuid() -> String {
    let mut bytes: [u8; 16] = rand::thread_rng().gen();
    // Version 4, RFC 4122 variant.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15]
    )
}
