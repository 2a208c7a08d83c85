//! Generation pipeline: enhance the request, generate code, strip fences,
//! commit a version and narrate each step in the conversation.
//!
//! Credits are debited before the first model call. From that point every
//! failure is caught by [`guarded`], which annotates the conversation and
//! refunds before the error reaches the caller.

use uuid::Uuid;

use crate::config::GenerationConfig;
use crate::error::{Result, SitesmithError};
use crate::ledger;
use crate::llm::{CompletionModel, CompletionRequest};
use crate::model::{validate_prompt, Message, Project, User, Version};
use crate::projects::owned_project;
use crate::prompts;
use crate::sanitize::strip_fences;
use crate::storage::StorageBackend;

enum Job<'a> {
    Create { prompt: &'a str },
    Revise { message: &'a str },
}

impl Job<'_> {
    fn request(&self) -> &str {
        match self {
            Job::Create { prompt } => prompt,
            Job::Revise { message } => message,
        }
    }
}

/// Validate and register a new project, debit its cost and log the user's
/// prompt. The returned project has no code yet; hand it to
/// [`generate_project`] (usually on a background task).
pub async fn start_project(
    storage: &impl StorageBackend,
    user_id: &str,
    prompt: &str,
    config: &GenerationConfig,
) -> Result<Project> {
    let user = require_user(storage, user_id).await?;
    require_credits(&user, config.cost)?;
    let prompt = validate_prompt(prompt)?;

    let project = Project::new(user.id.clone(), prompt.to_string(), config.name_max_chars);
    storage.create_project(&project).await?;

    let registered = async {
        storage
            .append_message(&Message::user(project.id, prompt))
            .await?;
        ledger::debit_for_creation(storage, user_id, config.cost).await
    }
    .await;

    if let Err(e) = registered {
        // An unpaid or unlogged project would poll as "generating" forever.
        if let Err(cleanup) = storage.delete_project(project.id).await {
            tracing::warn!(project_id = %project.id, error = %cleanup, "failed to remove unpaid project");
        }
        return Err(e);
    }

    tracing::info!(project_id = %project.id, user_id, cost = config.cost, "project created");
    Ok(project)
}

/// Run the first generation for a project returned by [`start_project`].
pub async fn generate_project(
    storage: &impl StorageBackend,
    model: &impl CompletionModel,
    project: &Project,
    cost: i64,
) -> Result<Version> {
    let job = Job::Create {
        prompt: &project.initial_prompt,
    };
    guarded(storage, model, project.id, &project.user_id, cost, job).await
}

/// Apply a change request to an owned project and wait for the new version.
pub async fn revise_project(
    storage: &impl StorageBackend,
    model: &impl CompletionModel,
    project_id: Uuid,
    user_id: &str,
    message: &str,
    cost: i64,
) -> Result<Version> {
    let user = require_user(storage, user_id).await?;
    require_credits(&user, cost)?;
    let message = validate_prompt(message)?;
    owned_project(storage, project_id, user_id).await?;

    storage
        .append_message(&Message::user(project_id, message))
        .await?;
    ledger::debit(storage, user_id, cost).await?;

    guarded(storage, model, project_id, user_id, cost, Job::Revise { message }).await
}

async fn require_user(storage: &impl StorageBackend, user_id: &str) -> Result<User> {
    match storage.get_user(user_id).await {
        Ok(user) => Ok(user),
        Err(SitesmithError::NotFound(_)) => {
            Err(SitesmithError::Unauthorized("unknown user".into()))
        }
        Err(e) => Err(e),
    }
}

fn require_credits(user: &User, cost: i64) -> Result<()> {
    if user.credits < cost {
        return Err(SitesmithError::InsufficientCredits {
            needed: cost,
            available: user.credits,
        });
    }
    Ok(())
}

/// Everything after the debit. Any error is annotated and refunded here.
async fn guarded(
    storage: &impl StorageBackend,
    model: &impl CompletionModel,
    project_id: Uuid,
    user_id: &str,
    cost: i64,
    job: Job<'_>,
) -> Result<Version> {
    match execute(storage, model, project_id, &job).await {
        Ok(version) => Ok(version),
        Err(e) => {
            tracing::warn!(%project_id, user_id, error = %e, "generation failed, refunding");
            let note = Message::assistant(project_id, prompts::generation_failed(failure_reason(&e), cost));
            if let Err(log_err) = storage.append_message(&note).await {
                tracing::warn!(%project_id, error = %log_err, "failed to record generation failure");
            }
            // refund() logs the amount owed if it gives up.
            let _ = ledger::refund(storage, user_id, cost).await;
            Err(e)
        }
    }
}

async fn execute(
    storage: &impl StorageBackend,
    model: &impl CompletionModel,
    project_id: Uuid,
    job: &Job<'_>,
) -> Result<Version> {
    let raw_request = job.request();

    let enhance = match job {
        Job::Create { prompt } => prompts::enhance_new_site(prompt),
        Job::Revise { message } => prompts::enhance_change(message),
    };
    let enhanced = model.complete(&enhance).await?;
    let enhanced = match enhanced.trim() {
        "" => {
            tracing::debug!(%project_id, "empty enhancement, using the raw request");
            raw_request.to_string()
        }
        text => text.to_string(),
    };

    storage
        .append_message(&Message::assistant(project_id, prompts::enhanced_to(&enhanced)))
        .await?;
    let status = match job {
        Job::Create { .. } => prompts::GENERATING_SITE,
        Job::Revise { .. } => prompts::MAKING_CHANGES,
    };
    storage
        .append_message(&Message::assistant(project_id, status))
        .await?;

    let (request, seen_pointer): (CompletionRequest, Option<String>) = match job {
        Job::Create { .. } => (prompts::generate_site(&enhanced), None),
        Job::Revise { .. } => {
            let current = storage.get_project(project_id).await?;
            let code = current.current_code.as_deref().unwrap_or_default();
            (
                prompts::apply_change(code, &enhanced),
                Some(current.current_version_index),
            )
        }
    };

    let raw_code = model.complete(&request).await?;
    let code = strip_fences(&raw_code);
    if code.is_empty() {
        return Err(SitesmithError::GenerationFailed(
            "model returned no code".into(),
        ));
    }

    if let Some(seen) = seen_pointer {
        let latest = storage.get_project(project_id).await?;
        if latest.current_version_index != seen {
            tracing::warn!(
                %project_id,
                overwritten = %latest.current_version_index,
                "project changed during revision, last writer wins"
            );
        }
    }

    let (description, done) = match job {
        Job::Create { .. } => (prompts::INITIAL_VERSION, prompts::SITE_READY),
        Job::Revise { .. } => (prompts::CHANGES_MADE, prompts::CHANGES_READY),
    };
    let version = Version::new(project_id, code, description);
    storage.commit_version(&version).await?;
    tracing::info!(%project_id, version_id = %version.id, "version committed");

    // The version is in; a lost narration line must not trigger a refund.
    if let Err(e) = storage
        .append_message(&Message::assistant(project_id, done))
        .await
    {
        tracing::warn!(%project_id, error = %e, "failed to record completion message");
    }

    Ok(version)
}

fn failure_reason(e: &SitesmithError) -> &'static str {
    match e {
        SitesmithError::GenerationFailed(_) => "the model returned no code",
        SitesmithError::Upstream(_) | SitesmithError::Http(_) => {
            "the model service was unavailable"
        }
        _ => "an internal error occurred",
    }
}
