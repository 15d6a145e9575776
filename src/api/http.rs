use super::{
    ActivateRequest, ActivateResponse, ApiError, DecisionRequest, DecisionResponse, FlowRecord,
    PlannerApi, TurnRequest, TurnResponse,
};
use crate::config::{api_token_from_env, Settings};
use crate::shared::ids::{ConversationId, FlowId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpPlannerApi {
    api_base: String,
    token: Option<String>,
    agent: ureq::Agent,
}

impl HttpPlannerApi {
    pub fn new(api_base: impl Into<String>, token: Option<String>, timeout: Duration) -> Self {
        Self {
            api_base: api_base.into(),
            token,
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.api_base.clone(),
            api_token_from_env(),
            Duration::from_secs(settings.http.timeout_secs),
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: ureq::Request) -> ureq::Request {
        match self.token.as_deref() {
            Some(token) => request.set("Authorization", &format!("Bearer {token}")),
            None => request,
        }
    }

    fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.endpoint(path);
        let payload = serde_json::to_value(body).map_err(|e| ApiError::Encode(e.to_string()))?;
        let response = self
            .authorize(self.agent.post(&url))
            .send_json(payload)
            .map_err(map_ureq_error)?;
        response
            .into_json::<T>()
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.endpoint(path);
        let response = self
            .authorize(self.agent.get(&url))
            .call()
            .map_err(map_ureq_error)?;
        response
            .into_json::<T>()
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

fn map_ureq_error(err: ureq::Error) -> ApiError {
    match err {
        ureq::Error::Status(status, response) => ApiError::Status {
            status,
            body: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => ApiError::Transport(transport.to_string()),
    }
}

impl PlannerApi for HttpPlannerApi {
    fn send_turn(&self, request: &TurnRequest) -> Result<TurnResponse, ApiError> {
        self.post_json("chat/turn", request)
    }

    fn lifecycle_decision(&self, request: &DecisionRequest) -> Result<DecisionResponse, ApiError> {
        self.post_json("workflows/decision", request)
    }

    fn flow_activate(&self, flow_id: &FlowId, is_active: bool) -> Result<ActivateResponse, ApiError> {
        self.post_json(
            &format!("flows/{}/activate", urlencoding::encode(flow_id.as_str())),
            &ActivateRequest { is_active },
        )
    }

    fn flow_lookup_by_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<FlowRecord>, ApiError> {
        let path = format!(
            "flows/by-conversation/{}",
            urlencoding::encode(conversation_id.as_str())
        );
        match self.get_json::<FlowRecord>(&path) {
            Ok(record) => Ok(Some(record)),
            Err(ApiError::Status { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
