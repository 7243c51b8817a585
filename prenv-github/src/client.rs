//! GitHub REST client: open pull request listing and commit statuses.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use prenv_core::{
    ChangeRequest, ChangeRequestId, ChangeRequestState, CommitSha, Credential, RepoRef, Settings,
    StatusOutcome,
};
use prenv_reconcile::{ChangeRequestSource, RemoteError, StatusReporter};

pub const API_VERSION: &str = "2022-11-28";
pub const PER_PAGE: usize = 100;
/// Hard stop on pagination; running into it fails the listing.
pub const MAX_PAGES: usize = 50;
/// GitHub rejects longer status descriptions.
pub const MAX_DESCRIPTION_CHARS: usize = 140;

const USER_AGENT: &str = concat!("prenv/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    number: u64,
    #[serde(default)]
    state: String,
    head: HeadPayload,
    #[serde(default)]
    merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct HeadPayload {
    sha: String,
}

impl PullRequestPayload {
    fn into_change_request(self) -> ChangeRequest {
        let state = if self.state == "closed" {
            ChangeRequestState::Closed
        } else {
            ChangeRequestState::Open
        };
        ChangeRequest {
            id: ChangeRequestId(self.number),
            head_sha: CommitSha(self.head.sha),
            state,
            closed_at: self.closed_at,
        }
    }
}

#[derive(Clone)]
pub struct GithubClient {
    agent: ureq::Agent,
    api_url: String,
    status_context: String,
}

impl GithubClient {
    pub fn new(api_url: &str, status_context: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            api_url: api_url.trim_end_matches('/').to_string(),
            status_context: status_context.to_string(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            &settings.github_api_url,
            &settings.status_context,
            settings.call_timeout(),
        )
    }

    fn authed(&self, request: ureq::Request, credential: &Credential) -> ureq::Request {
        request
            .set("Authorization", &format!("Bearer {}", credential.expose()))
            .set("Accept", "application/vnd.github+json")
            .set("X-GitHub-Api-Version", API_VERSION)
    }

    fn list_page(
        &self,
        repo: &RepoRef,
        credential: &Credential,
        page: usize,
    ) -> Result<Vec<PullRequestPayload>, RemoteError> {
        let url = format!("{}/repos/{}/{}/pulls", self.api_url, repo.owner, repo.repo);
        let request = self
            .authed(self.agent.get(&url), credential)
            .query("state", "open")
            .query("per_page", &PER_PAGE.to_string())
            .query("page", &page.to_string());
        let response = request.call().map_err(|e| remote_err(&url, e))?;
        response
            .into_json::<Vec<PullRequestPayload>>()
            .map_err(|e| RemoteError::Decode {
                url,
                message: e.to_string(),
            })
    }
}

impl ChangeRequestSource for GithubClient {
    fn list_open_change_requests(
        &self,
        repo: &RepoRef,
        credential: &Credential,
    ) -> Result<Vec<ChangeRequest>, RemoteError> {
        let mut out = Vec::new();
        for page in 1..=MAX_PAGES {
            let batch = self.list_page(repo, credential, page)?;
            let last = batch.len() < PER_PAGE;
            out.extend(
                batch
                    .into_iter()
                    .filter(|pr| pr.merged_at.is_none())
                    .map(PullRequestPayload::into_change_request),
            );
            if last {
                return Ok(out);
            }
        }
        // A partial listing would read as closed PRs and delete their environments.
        Err(RemoteError::Decode {
            url: format!("{}/repos/{}/{}/pulls", self.api_url, repo.owner, repo.repo),
            message: format!(
                "listing truncated: more than {MAX_PAGES} pages of open pull requests"
            ),
        })
    }
}

impl StatusReporter for GithubClient {
    fn report_status(
        &self,
        repo: &RepoRef,
        credential: &Credential,
        sha: &str,
        outcome: StatusOutcome,
        message: &str,
    ) -> Result<(), RemoteError> {
        let url = format!(
            "{}/repos/{}/{}/statuses/{sha}",
            self.api_url, repo.owner, repo.repo
        );
        let body = serde_json::json!({
            "state": github_state(outcome),
            "description": truncate_description(message),
            "context": self.status_context,
        });
        self.authed(self.agent.post(&url), credential)
            .send_json(body)
            .map_err(|e| remote_err(&url, e))?;
        Ok(())
    }
}

/// GitHub only knows `error`, `failure`, `pending` and `success`. A closed
/// pull request's environment going away is not a failure of the commit.
pub fn github_state(outcome: StatusOutcome) -> &'static str {
    match outcome {
        StatusOutcome::Pending => "pending",
        StatusOutcome::Success | StatusOutcome::Closed => "success",
        StatusOutcome::Failure => "failure",
    }
}

pub fn truncate_description(message: &str) -> String {
    message.chars().take(MAX_DESCRIPTION_CHARS).collect()
}

fn remote_err(url: &str, err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            RemoteError::Http {
                url: url.to_string(),
                status,
                message: body.chars().take(200).collect(),
            }
        }
        ureq::Error::Transport(transport) => RemoteError::Transport {
            url: url.to_string(),
            message: transport.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(StatusOutcome::Pending, "pending")]
    #[case(StatusOutcome::Success, "success")]
    #[case(StatusOutcome::Failure, "failure")]
    #[case(StatusOutcome::Closed, "success")]
    fn maps_outcomes_to_github_states(#[case] outcome: StatusOutcome, #[case] state: &str) {
        assert_eq!(github_state(outcome), state);
    }

    #[test]
    fn description_is_capped() {
        let long = "é".repeat(200);
        assert_eq!(truncate_description(&long).chars().count(), MAX_DESCRIPTION_CHARS);
        assert_eq!(truncate_description("short"), "short");
    }

    #[test]
    fn payload_maps_to_change_request() {
        let pr: PullRequestPayload = serde_json::from_value(serde_json::json!({
            "number": 12,
            "state": "open",
            "head": {"sha": "abc", "ref": "feature"},
            "merged_at": null,
            "title": "ignored"
        }))
        .expect("payload");
        let cr = pr.into_change_request();
        assert_eq!(cr, ChangeRequest::open(12, "abc"));
    }
}
