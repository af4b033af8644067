//! reqwest implementation of [`BackendApi`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::types::{
    ContactsLink, CreatedWorkspace, Envelope, InvitePlaceholder, InviteRequest, MethodIdResult,
    NewUser, NewWorkspace, Profile, RequestCode, Service, VerifiedUser, VerifyCode, VerifyResult,
    WorkspaceMember, EnvelopeOutcome, envelope_code, envelope_outcome, workspace_id,
};
use super::BackendApi;
use crate::config::ServiceEndpoints;
use crate::error::ApiError;

/// Talks to the five backend services over HTTP.
pub struct HttpBackend {
    client: reqwest::Client,
    endpoints: ServiceEndpoints,
}

impl HttpBackend {
    pub fn new(endpoints: ServiceEndpoints, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::RequestFailed {
                service: "client".to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, endpoints })
    }

    fn url(&self, service: Service, path: &str) -> String {
        let base = match service {
            Service::Auth => &self.endpoints.auth,
            Service::User => &self.endpoints.user,
            Service::Workspace => &self.endpoints.workspace,
            Service::Invite => &self.endpoints.invite,
            Service::Contacts => &self.endpoints.contacts,
        };
        format!("{}/{path}", base.trim_end_matches('/'))
    }

    fn request(
        &self,
        method: Method,
        service: Service,
        path: &str,
        token: Option<&SecretString>,
    ) -> RequestBuilder {
        let builder = self.client.request(method, self.url(service, path));
        match token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    /// Send a request and return the parsed JSON body (Null when empty).
    async fn send(&self, service: Service, request: RequestBuilder) -> Result<Value, ApiError> {
        let (status, body) = self.send_raw(service, request).await?;
        if !status.is_success() {
            return Err(ApiError::Status {
                service: service.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        let value = parse_body(service, &body)?;
        match envelope_outcome(&value) {
            EnvelopeOutcome::Success => Ok(value),
            EnvelopeOutcome::TokenRejected => Err(ApiError::Unauthorized {
                service: service.to_string(),
            }),
            EnvelopeOutcome::Failed(code) => Err(ApiError::Rejected {
                service: service.to_string(),
                code,
                body,
            }),
        }
    }

    async fn send_raw(
        &self,
        service: Service,
        request: RequestBuilder,
    ) -> Result<(StatusCode, String), ApiError> {
        let resp = request.send().await.map_err(|e| ApiError::RequestFailed {
            service: service.to_string(),
            reason: e.to_string(),
        })?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthorized {
                service: service.to_string(),
            });
        }

        let body = resp.text().await.map_err(|e| ApiError::RequestFailed {
            service: service.to_string(),
            reason: e.to_string(),
        })?;
        debug!(service = %service, status = status.as_u16(), "Backend responded");
        Ok((status, body))
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        service: Service,
        path: &str,
        token: Option<&SecretString>,
        body: &B,
    ) -> Result<Value, ApiError> {
        let request = self.request(method, service, path, token).json(body);
        self.send(service, request).await
    }
}

fn parse_body(service: Service, body: &str) -> Result<Value, ApiError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|e| ApiError::InvalidResponse {
        service: service.to_string(),
        reason: e.to_string(),
    })
}

fn decode<T: DeserializeOwned>(service: Service, body: Value) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|e| ApiError::InvalidResponse {
        service: service.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn request_code(&self, request: &RequestCode) -> Result<String, ApiError> {
        let body = self
            .send_json(Method::POST, Service::Auth, "auth/email", None, request)
            .await?;
        let parsed: Envelope<MethodIdResult> = decode(Service::Auth, body)?;
        Ok(parsed.result.method_id)
    }

    async fn verify_code(&self, request: &VerifyCode) -> Result<VerifiedUser, ApiError> {
        let body = self
            .send_json(Method::POST, Service::Auth, "verify/email", None, request)
            .await?;
        let parsed: Envelope<VerifyResult> = decode(Service::Auth, body)?;
        Ok(VerifiedUser {
            user_id: parsed.result.user_id,
            access_token: SecretString::from(parsed.result.token.access_token),
        })
    }

    async fn get_profile(&self, token: &SecretString) -> Result<Profile, ApiError> {
        let request = self.request(Method::GET, Service::User, "user", Some(token));
        let (status, body) = self.send_raw(Service::User, request).await?;

        // The user service reports a missing profile through the envelope
        // code, sometimes with a matching HTTP status.
        match parse_body(Service::User, &body) {
            Ok(value) if envelope_outcome(&value) == EnvelopeOutcome::TokenRejected => {
                Err(ApiError::Unauthorized {
                    service: Service::User.to_string(),
                })
            }
            Ok(value) => Ok(Profile {
                code: envelope_code(&value, status.as_u16()),
                body: value,
            }),
            Err(_) if !status.is_success() => Ok(Profile {
                code: i64::from(status.as_u16()),
                body: Value::String(body),
            }),
            Err(e) => Err(e),
        }
    }

    async fn create_user(&self, token: &SecretString, user: &NewUser) -> Result<(), ApiError> {
        self.send_json(Method::POST, Service::User, "user", Some(token), user)
            .await?;
        Ok(())
    }

    async fn delete_user(&self, token: &SecretString) -> Result<(), ApiError> {
        let request = self.request(Method::DELETE, Service::User, "user", Some(token));
        self.send(Service::User, request).await?;
        Ok(())
    }

    async fn create_workspace(
        &self,
        token: &SecretString,
        workspace: &NewWorkspace,
    ) -> Result<CreatedWorkspace, ApiError> {
        let body = self
            .send_json(
                Method::POST,
                Service::Workspace,
                "workspace",
                Some(token),
                workspace,
            )
            .await?;
        let id = workspace_id(&body).ok_or_else(|| ApiError::InvalidResponse {
            service: Service::Workspace.to_string(),
            reason: "response carries no workspace id".to_string(),
        })?;
        Ok(CreatedWorkspace { id })
    }

    async fn add_to_workspace(
        &self,
        token: &SecretString,
        member: &WorkspaceMember,
    ) -> Result<(), ApiError> {
        self.send_json(
            Method::POST,
            Service::Workspace,
            "workspace_util",
            Some(token),
            member,
        )
        .await?;
        Ok(())
    }

    async fn link_contacts(
        &self,
        token: &SecretString,
        link: &ContactsLink,
    ) -> Result<(), ApiError> {
        self.send_json(Method::POST, Service::Contacts, "contacts", Some(token), link)
            .await?;
        Ok(())
    }

    async fn create_invite_placeholder(
        &self,
        token: &SecretString,
        placeholder: &InvitePlaceholder,
    ) -> Result<(), ApiError> {
        self.send_json(Method::PUT, Service::Invite, "invite", Some(token), placeholder)
            .await?;
        Ok(())
    }

    async fn send_invite(
        &self,
        token: &SecretString,
        invite: &InviteRequest,
    ) -> Result<(), ApiError> {
        self.send_json(Method::POST, Service::Invite, "invite", Some(token), invite)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> HttpBackend {
        HttpBackend::new(
            ServiceEndpoints::uniform("http://localhost:9000/api/"),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn url_joins_without_double_slash() {
        let backend = backend();
        assert_eq!(
            backend.url(Service::Auth, "auth/email"),
            "http://localhost:9000/api/auth/email"
        );
        assert_eq!(
            backend.url(Service::Workspace, "workspace_util"),
            "http://localhost:9000/api/workspace_util"
        );
    }

    #[test]
    fn empty_body_parses_as_null() {
        assert_eq!(parse_body(Service::User, "  ").unwrap(), Value::Null);
        assert!(matches!(
            parse_body(Service::User, "not json"),
            Err(ApiError::InvalidResponse { .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_backend_is_request_failure() {
        let backend = HttpBackend::new(
            ServiceEndpoints::uniform("http://127.0.0.1:1"),
            Duration::from_secs(1),
        )
        .unwrap();
        let err = backend
            .request_code(&RequestCode {
                email: "a@x.com".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::RequestFailed { .. }));
    }
}
