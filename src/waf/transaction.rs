use super::engine::WafInner;
use super::{
    BodyInspector, BodyLimitAction, BodyWrite, EngineError, InspectionTarget, Interruption,
    MatchedRule, RuleEngineMode, SecurityViolation, Transaction, Variable, RULESET_VERSION,
};
use log::{info, warn};
use std::sync::Arc;

/// Rule ID reported for body-limit rejections, which no rule owns.
pub const BODY_LIMIT_RULE_ID: u32 = 0;

const PAYLOAD_TOO_LARGE: u16 = 413;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyPhase {
    Pending,
    /// The body limit was hit inside a write and the phase ran there.
    FinalizedByLimit,
    Finalized,
}

/// Transaction of the built-in rule engine.
pub struct WafTransaction {
    waf: Arc<WafInner>,
    id: String,
    request_id: Option<String>,
    server_name: String,
    client_ip: String,
    client_port: u16,
    server_ip: String,
    server_port: u16,
    method: String,
    uri: String,
    protocol: String,
    request_headers: Vec<(String, String)>,
    response_headers: Vec<(String, String)>,
    response_status: u16,
    request_body: BodyInspector,
    response_body: BodyInspector,
    request_body_phase: BodyPhase,
    response_body_phase: BodyPhase,
    matched: Vec<SecurityViolation>,
    interruption: Option<Interruption>,
    closed: bool,
}

impl WafTransaction {
    pub(crate) fn new(waf: Arc<WafInner>, id: &str) -> Self {
        let (id, request_id) = if id.is_empty() {
            (uuid::Uuid::new_v4().to_string(), None)
        } else {
            (id.to_string(), Some(id.to_string()))
        };
        let request_body = BodyInspector::new(waf.settings.request_body_limit);
        let response_body = BodyInspector::new(waf.settings.response_body_limit);

        Self {
            waf,
            id,
            request_id,
            server_name: String::new(),
            client_ip: String::new(),
            client_port: 0,
            server_ip: String::new(),
            server_port: 0,
            method: String::new(),
            uri: String::new(),
            protocol: String::new(),
            request_headers: Vec::new(),
            response_headers: Vec::new(),
            response_status: 0,
            request_body,
            response_body,
            request_body_phase: BodyPhase::Pending,
            response_body_phase: BodyPhase::Pending,
            matched: Vec::new(),
            interruption: None,
            closed: false,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn matched_rules(&self) -> &[SecurityViolation] {
        &self.matched
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed {
            return Err(EngineError::Closed(self.id.clone()));
        }
        Ok(())
    }

    fn record(&mut self, violations: Vec<SecurityViolation>) {
        for violation in violations {
            if let Some(callback) = &self.waf.on_match {
                callback(&self.matched_rule(&violation));
            }
            if violation.blocked
                && self.waf.settings.mode == RuleEngineMode::On
                && self.interruption.is_none()
            {
                self.interruption = Some(Interruption::deny(
                    violation.rule_id,
                    self.waf.settings.block_status,
                ));
            }
            self.matched.push(violation);
        }
    }

    fn matched_rule(&self, violation: &SecurityViolation) -> MatchedRule {
        MatchedRule {
            transaction_id: self.id.clone(),
            request_id: self.request_id.clone(),
            client_ip: self.client_ip.clone(),
            uri: self.uri.clone(),
            rule_id: violation.rule_id,
            category: violation.threat_type.to_lowercase(),
            severity: violation.threat_level,
            message: violation.description.clone(),
            data: violation.data.clone(),
            matched_data: violation.variable.name().to_string(),
            matched_data_name: violation.key.clone(),
            tags: vec![
                violation.threat_type.clone(),
                format!("directive:{}", self.waf.settings.name),
            ],
            version: RULESET_VERSION,
        }
    }

    fn reject_oversized_body(&mut self, variable: Variable) {
        warn!(
            "[{}] {} exceeded its limit in directive set {}",
            self.id,
            variable.name(),
            self.waf.settings.name
        );
        if self.waf.settings.mode == RuleEngineMode::On && self.interruption.is_none() {
            self.interruption = Some(Interruption::deny(BODY_LIMIT_RULE_ID, PAYLOAD_TOO_LARGE));
        }
    }

    fn evaluate_request_headers(&mut self) {
        let violations = {
            let mut targets = vec![
                InspectionTarget::new(Variable::RemoteAddr, &self.client_ip),
                InspectionTarget::new(Variable::RequestUri, &self.uri),
            ];
            targets.extend(
                self.request_headers
                    .iter()
                    .map(|(k, v)| InspectionTarget::header(Variable::RequestHeaders, k, v)),
            );
            self.waf.rules.evaluate_all(&targets)
        };
        self.record(violations);
    }

    fn evaluate_request_body(&mut self) {
        if self.request_body.is_empty() {
            return;
        }
        let violations = {
            let body = self.request_body.as_text();
            let targets = [InspectionTarget::new(Variable::RequestBody, &body)];
            self.waf.rules.evaluate_all(&targets)
        };
        self.record(violations);
    }

    fn evaluate_response_headers(&mut self) {
        let violations = {
            let targets: Vec<_> = self
                .response_headers
                .iter()
                .map(|(k, v)| InspectionTarget::header(Variable::ResponseHeaders, k, v))
                .collect();
            self.waf.rules.evaluate_all(&targets)
        };
        self.record(violations);
    }

    fn evaluate_response_body(&mut self) {
        if self.response_body.is_empty() {
            return;
        }
        let violations = {
            let body = self.response_body.as_text();
            let targets = [InspectionTarget::new(Variable::ResponseBody, &body)];
            self.waf.rules.evaluate_all(&targets)
        };
        self.record(violations);
    }
}

impl Transaction for WafTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn add_request_header(&mut self, key: &str, value: &str) {
        self.request_headers.push((key.to_string(), value.to_string()));
    }

    fn add_response_header(&mut self, key: &str, value: &str) {
        self.response_headers.push((key.to_string(), value.to_string()));
    }

    fn set_server_name(&mut self, name: &str) {
        self.server_name = name.to_string();
    }

    fn is_rule_engine_off(&self) -> bool {
        self.waf.settings.mode == RuleEngineMode::Off
    }

    fn is_request_body_accessible(&self) -> bool {
        self.waf.settings.request_body_access
    }

    fn is_response_body_accessible(&self) -> bool {
        self.waf.settings.response_body_access
    }

    fn process_connection(&mut self, client_ip: &str, client_port: u16, server_ip: &str, server_port: u16) {
        self.client_ip = client_ip.to_string();
        self.client_port = client_port;
        self.server_ip = server_ip.to_string();
        self.server_port = server_port;
    }

    fn process_uri(&mut self, uri: &str, method: &str, protocol: &str) {
        self.uri = uri.to_string();
        self.method = method.to_string();
        self.protocol = protocol.to_string();
    }

    fn process_request_headers(&mut self) -> Option<Interruption> {
        if self.closed || self.is_rule_engine_off() {
            return None;
        }
        if self.interruption.is_none() {
            self.evaluate_request_headers();
        }
        self.interruption.clone()
    }

    fn write_request_body(&mut self, data: &[u8]) -> Result<BodyWrite, EngineError> {
        self.ensure_open()?;
        if self.is_rule_engine_off() || !self.waf.settings.request_body_access {
            return Ok(BodyWrite::default());
        }
        if self.interruption.is_some() || self.request_body_phase != BodyPhase::Pending {
            return Ok(BodyWrite {
                interruption: self.interruption.clone(),
                buffered: 0,
            });
        }

        let appended = self.request_body.append_chunk(data);
        if appended.limit_reached {
            match self.waf.settings.request_body_limit_action {
                BodyLimitAction::Reject => self.reject_oversized_body(Variable::RequestBody),
                BodyLimitAction::ProcessPartial => self.evaluate_request_body(),
            }
            self.request_body_phase = BodyPhase::FinalizedByLimit;
            return Ok(BodyWrite {
                interruption: self.interruption.clone(),
                buffered: appended.buffered,
            });
        }

        Ok(BodyWrite {
            interruption: None,
            buffered: appended.buffered,
        })
    }

    fn process_request_body(&mut self) -> Result<Option<Interruption>, EngineError> {
        self.ensure_open()?;
        if self.is_rule_engine_off() {
            return Ok(None);
        }
        match self.request_body_phase {
            BodyPhase::Finalized => Err(EngineError::PhaseAlreadyProcessed("request body")),
            BodyPhase::FinalizedByLimit => {
                self.request_body_phase = BodyPhase::Finalized;
                Ok(self.interruption.clone())
            }
            BodyPhase::Pending => {
                self.request_body_phase = BodyPhase::Finalized;
                if self.interruption.is_none() {
                    self.evaluate_request_body();
                }
                Ok(self.interruption.clone())
            }
        }
    }

    fn process_response_headers(&mut self, status: u16, protocol: &str) -> Option<Interruption> {
        self.response_status = status;
        if self.protocol.is_empty() {
            self.protocol = protocol.to_string();
        }
        if self.closed || self.is_rule_engine_off() {
            return None;
        }
        if self.interruption.is_none() {
            self.evaluate_response_headers();
        }
        self.interruption.clone()
    }

    fn write_response_body(&mut self, data: &[u8]) -> Result<BodyWrite, EngineError> {
        self.ensure_open()?;
        if self.is_rule_engine_off() || !self.waf.settings.response_body_access {
            return Ok(BodyWrite::default());
        }
        if self.interruption.is_some() || self.response_body_phase != BodyPhase::Pending {
            return Ok(BodyWrite {
                interruption: self.interruption.clone(),
                buffered: 0,
            });
        }

        let appended = self.response_body.append_chunk(data);
        if appended.limit_reached {
            match self.waf.settings.response_body_limit_action {
                BodyLimitAction::Reject => self.reject_oversized_body(Variable::ResponseBody),
                BodyLimitAction::ProcessPartial => self.evaluate_response_body(),
            }
            self.response_body_phase = BodyPhase::FinalizedByLimit;
            return Ok(BodyWrite {
                interruption: self.interruption.clone(),
                buffered: appended.buffered,
            });
        }

        Ok(BodyWrite {
            interruption: None,
            buffered: appended.buffered,
        })
    }

    fn process_response_body(&mut self) -> Result<Option<Interruption>, EngineError> {
        self.ensure_open()?;
        if self.is_rule_engine_off() {
            return Ok(None);
        }
        match self.response_body_phase {
            BodyPhase::Finalized => Err(EngineError::PhaseAlreadyProcessed("response body")),
            BodyPhase::FinalizedByLimit => {
                self.response_body_phase = BodyPhase::Finalized;
                Ok(self.interruption.clone())
            }
            BodyPhase::Pending => {
                self.response_body_phase = BodyPhase::Finalized;
                if self.interruption.is_none() {
                    self.evaluate_response_body();
                }
                Ok(self.interruption.clone())
            }
        }
    }

    fn process_logging(&mut self) {
        if self.matched.is_empty() {
            return;
        }
        let rule_ids: Vec<String> = self.matched.iter().map(|v| v.rule_id.to_string()).collect();
        let verdict = match &self.interruption {
            Some(interruption) => format!("interrupted with {}", interruption.status),
            None => "allowed".to_string(),
        };
        info!(
            "[{}] {} {} {} from {}:{} to {} ({}:{}) status {} matched rules [{}], {}",
            self.id,
            self.method,
            self.uri,
            self.protocol,
            self.client_ip,
            self.client_port,
            self.server_name,
            self.server_ip,
            self.server_port,
            self.response_status,
            rule_ids.join(", "),
            verdict
        );
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.closed = true;
        self.request_body.clear();
        self.response_body.clear();
        Ok(())
    }
}
