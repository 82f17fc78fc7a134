mod common;

use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn import_legacy_documents() {
    let app = TestApp::new().await;

    let documents = json!([
        {
            "_id": { "$oid": "65a1f0c2e4b0a1b2c3d4e5f6" },
            "caption": "Old summer",
            "description": "Imported",
            "endTime": "2020-08-01T00:00:00.000Z",
            "createdAt": { "$date": "2020-01-01T00:00:00.000Z" },
            "fileType": "image",
            "fileUrl": "/uploads/1-summer.jpg",
            "userId": "user_legacy"
        },
        {
            "caption": "No owner",
            "description": "Falls back to --user",
            "endTime": "2099-01-01T00:00",
            "files": [{ "fileType": "video", "fileData": "data:video/mp4;base64,AA" }]
        },
        {
            "caption": "Broken",
            "description": "Bad date",
            "endTime": "someday"
        }
    ]);

    let path = std::env::temp_dir().join(format!("capsules-{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, documents.to_string()).unwrap();

    let imported = timecapsule::cli::import_capsules(&app.db, &path, "user_default")
        .await
        .unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(imported, 2);

    let rows: Vec<(String, String, String)> =
        sqlx::query_as("SELECT caption, user_id, created_at FROM capsules ORDER BY caption")
            .fetch_all(&app.db)
            .await
            .unwrap();
    assert_eq!(rows[0].0, "No owner");
    assert_eq!(rows[0].1, "user_default");
    assert_eq!(rows[1].0, "Old summer");
    assert_eq!(rows[1].1, "user_legacy");
    assert_eq!(rows[1].2, "2020-01-01T00:00:00.000Z");

    let (media,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM capsule_media")
        .fetch_one(&app.db)
        .await
        .unwrap();
    assert_eq!(media, 2);
}

#[tokio::test]
async fn import_tolerates_sparse_documents_and_skips_invalid_ones() {
    let app = TestApp::new().await;

    let documents = json!([
        {
            "caption": "Personal",
            "description": "ok",
            "endTime": "2030-01-01T00:00"
        },
        {
            "groupId": "g1",
            "caption": "Group night",
            "endTime": "2030-01-01T00:00",
            "createdBy": "user_author"
        },
        {
            "caption": "",
            "description": "",
            "endTime": "2030-01-01T00:00"
        },
        {
            "caption": "c".repeat(301),
            "description": "Too long a caption",
            "endTime": "2030-01-01T00:00"
        }
    ]);

    let path = std::env::temp_dir().join(format!("capsules-{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, documents.to_string()).unwrap();

    let imported = timecapsule::cli::import_capsules(&app.db, &path, "user_default")
        .await
        .unwrap();
    std::fs::remove_file(&path).ok();

    // The group document has no description, so only the personal one lands.
    assert_eq!(imported, 1);

    let rows: Vec<(String, String, Option<String>)> =
        sqlx::query_as("SELECT caption, user_id, group_id FROM capsules")
            .fetch_all(&app.db)
            .await
            .unwrap();
    assert_eq!(rows, vec![("Personal".to_string(), "user_default".to_string(), None)]);
}

#[tokio::test]
async fn import_assigns_group_capsule_author_from_created_by() {
    let app = TestApp::new().await;

    let documents = json!([
        {
            "groupId": "g1",
            "caption": "Group night",
            "description": "Board games",
            "endTime": { "$date": "2030-01-01T00:00:00.000Z" },
            "createdBy": "user_author"
        }
    ]);

    let path = std::env::temp_dir().join(format!("capsules-{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, documents.to_string()).unwrap();

    let imported = timecapsule::cli::import_capsules(&app.db, &path, "user_default")
        .await
        .unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(imported, 1);
    let (user_id, group_id): (String, Option<String>) =
        sqlx::query_as("SELECT user_id, group_id FROM capsules")
            .fetch_one(&app.db)
            .await
            .unwrap();
    assert_eq!(user_id, "user_author");
    assert_eq!(group_id, None);
}
