//! End-to-end lifecycle against an on-disk SQLite database and the offline
//! `echo` model: create, generate, revise, roll back, hand-edit, publish, and
//! top up credits through a payment webhook.

use sitesmith_core::billing;
use sitesmith_core::config::{LlmConfig, SitesmithConfig};
use sitesmith_core::llm::LlmService;
use sitesmith_core::model::{find_plan, Transaction, User};
use sitesmith_core::storage::{SqliteStorage, StorageBackend};
use sitesmith_core::stripe::CheckoutMetadata;
use sitesmith_core::{ledger, pipeline, preview, projects, publish, versions};

fn temp_db() -> std::path::PathBuf {
    std::env::temp_dir()
        .join(format!("sitesmith-it-{}", uuid::Uuid::new_v4()))
        .join("sitesmith.db")
}

fn echo_model() -> LlmService {
    LlmService::from_config(&LlmConfig {
        provider: "echo".into(),
        ..Default::default()
    })
    .expect("echo provider needs no key")
}

#[tokio::test]
async fn test_full_site_lifecycle() {
    let path = temp_db();
    let storage = SqliteStorage::open(&path).expect("open db");
    let model = echo_model();
    let config = SitesmithConfig::default_config();
    let cost = config.generation.cost;

    storage
        .save_user(&User::new("owner", "Ada", "ada@example.com").with_credits(10))
        .await
        .expect("save user");

    // Create + generate
    let project = pipeline::start_project(
        &storage,
        "owner",
        "landing page for a bakery",
        &config.generation,
    )
    .await
    .expect("start project");
    assert!(project.current_code.is_none());
    assert_eq!(ledger::balance(&storage, "owner").await.unwrap(), 5);

    let first = pipeline::generate_project(&storage, &model, &project, cost)
        .await
        .expect("generate");
    let detail = projects::project_detail(&storage, project.id, "owner")
        .await
        .expect("detail");
    assert_eq!(detail.project.current_code.as_deref(), Some(first.code.as_str()));
    assert_eq!(detail.project.current_version_index, first.id.to_string());
    assert_eq!(detail.versions.len(), 1);
    assert!(!first.code.contains("```"));

    // Revise
    let second = pipeline::revise_project(
        &storage,
        &model,
        project.id,
        "owner",
        "add an opening hours section",
        cost,
    )
    .await
    .expect("revise");
    assert_eq!(ledger::balance(&storage, "owner").await.unwrap(), 0);

    // Out of credits
    let err = pipeline::revise_project(&storage, &model, project.id, "owner", "more", cost)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Insufficient credits"));
    assert_eq!(storage.list_versions(project.id).await.unwrap().len(), 2);

    // Roll back, then forward again
    let back = versions::rollback(&storage, project.id, "owner", first.id)
        .await
        .expect("rollback");
    assert_eq!(back.current_code.as_deref(), Some(first.code.as_str()));
    let forward = versions::rollback(&storage, project.id, "owner", second.id)
        .await
        .expect("roll forward");
    assert_eq!(forward.current_version_index, second.id.to_string());

    // Hand edit through the editable preview
    let editable = preview::render_preview(&storage, project.id, "owner", true)
        .await
        .expect("preview");
    let saved = preview::save_project_code(&storage, project.id, "owner", &editable)
        .await
        .expect("save");
    assert_eq!(saved.current_code.as_deref(), Some(second.code.as_str()));
    assert_eq!(saved.current_version_index, "");

    // Publish
    assert!(publish::public_code(&storage, project.id).await.is_err());
    let (published, _) = publish::toggle_publish(&storage, project.id, "owner")
        .await
        .expect("publish");
    assert!(published);
    assert_eq!(
        publish::public_code(&storage, project.id).await.unwrap(),
        second.code
    );

    // Top up through a settled purchase
    let transaction = Transaction::for_plan("owner", find_plan("pro").unwrap());
    storage.save_transaction(&transaction).await.unwrap();
    let metadata = CheckoutMetadata {
        transaction_id: Some(transaction.id.to_string()),
        app_id: Some(config.billing.app_id.clone()),
    };
    billing::apply_payment(&storage, &metadata, &config.billing.app_id)
        .await
        .expect("apply payment");
    billing::apply_payment(&storage, &metadata, &config.billing.app_id)
        .await
        .expect("redelivery");
    assert_eq!(ledger::balance(&storage, "owner").await.unwrap(), 400);

    // Reopen: everything survived on disk
    drop(storage);
    let reopened = SqliteStorage::open(&path).expect("reopen db");
    let project = reopened.get_project(project.id).await.unwrap();
    assert!(project.is_published);
    assert_eq!(reopened.list_versions(project.id).await.unwrap().len(), 2);

    projects::delete_project(&reopened, project.id, "owner")
        .await
        .expect("delete");
    assert!(reopened.list_messages(project.id).await.unwrap().is_empty());

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}
