mod helpers;

use chrono::Duration;
use db::models::{attendance, program_event};
use sea_orm::EntityTrait;
use services::error::ServiceError;
use uuid::Uuid;

use helpers::setup;

#[tokio::test]
async fn test_rerequest_rotates_key_on_same_row() {
    let ctx = setup(5).await;

    let first = ctx.service.request_key(ctx.attendee.id, ctx.event.id).await.unwrap();
    let created = ctx.attendance(ctx.attendee.id).await.unwrap();

    ctx.advance(Duration::minutes(3));
    let second = ctx.service.request_key(ctx.attendee.id, ctx.event.id).await.unwrap();

    assert_ne!(first.qr_code_key, second.qr_code_key);
    assert!(second.key_invalid_at >= first.key_invalid_at);

    let rows = attendance::Entity::find().all(&ctx.db).await.unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.created_at, created.created_at);
    assert_eq!(row.qr_code_key.as_deref(), Some(second.qr_code_key.as_str()));
    assert_eq!(row.key_invalid_at, second.key_invalid_at);
    assert!(row.completion_id.is_none());
}

#[tokio::test]
async fn test_key_expires_after_lifetime() {
    let ctx = setup(5).await;

    let key = ctx.service.request_key(ctx.attendee.id, ctx.event.id).await.unwrap();

    assert_eq!(key.key_invalid_at, ctx.now() + Duration::hours(24));
}

#[tokio::test]
async fn test_collisions_within_budget_are_absorbed() {
    let ctx = setup(3).await;
    ctx.keys.push(["LARPDUPE"]);
    ctx.service
        .request_key(ctx.other_attendee.id, ctx.event.id)
        .await
        .unwrap();

    // Two forced collisions, then a fresh code on the third and last attempt.
    ctx.keys.push(["LARPDUPE", "LARPDUPE", "LARPGOOD"]);
    let key = ctx.service.request_key(ctx.attendee.id, ctx.event.id).await.unwrap();

    assert_eq!(key.qr_code_key, "LARPGOOD");
    assert_eq!(ctx.keys.issued(), 4);
    let row = ctx.attendance(ctx.attendee.id).await.unwrap();
    assert_eq!(row.qr_code_key.as_deref(), Some("LARPGOOD"));
}

#[tokio::test]
async fn test_collisions_beyond_budget_conflict() {
    let ctx = setup(3).await;
    ctx.keys.push(["LARPDUPE"]);
    ctx.service
        .request_key(ctx.other_attendee.id, ctx.event.id)
        .await
        .unwrap();

    ctx.keys.push(["LARPDUPE", "LARPDUPE", "LARPDUPE", "LARPLATE"]);
    let err = ctx
        .service
        .request_key(ctx.attendee.id, ctx.event.id)
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Conflict(_)));
    assert_eq!(err.status_code(), 409);
    assert_eq!(ctx.keys.issued(), 4);
    assert!(ctx.attendance(ctx.attendee.id).await.is_none());

    // The same call succeeds once a non-colliding code comes up.
    let key = ctx.service.request_key(ctx.attendee.id, ctx.event.id).await.unwrap();
    assert_eq!(key.qr_code_key, "LARPLATE");
}

#[tokio::test]
async fn test_expired_key_still_blocks_reuse_until_released() {
    let ctx = setup(1).await;
    ctx.keys.push(["LARPSTAL"]);
    ctx.service
        .request_key(ctx.other_attendee.id, ctx.event.id)
        .await
        .unwrap();

    ctx.advance(Duration::days(2));
    ctx.keys.push(["LARPSTAL"]);
    let err = ctx
        .service
        .request_key(ctx.attendee.id, ctx.event.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    ctx.advance(Duration::days(5));
    assert_eq!(ctx.service.clean().await.unwrap(), 1);

    ctx.keys.push(["LARPSTAL"]);
    let key = ctx.service.request_key(ctx.attendee.id, ctx.event.id).await.unwrap();
    assert_eq!(key.qr_code_key, "LARPSTAL");
}

#[tokio::test]
async fn test_not_enrolled_user_is_rejected() {
    let ctx = setup(5).await;

    let err = ctx
        .service
        .request_key(ctx.outsider.id, ctx.event.id)
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::BadRequest(_)));
    assert_eq!(ctx.keys.issued(), 0);
    assert!(ctx.attendance(ctx.outsider.id).await.is_none());
}

#[tokio::test]
async fn test_cancelled_event_is_rejected() {
    let ctx = setup(5).await;
    program_event::Model::cancel(&ctx.db, ctx.event.id, ctx.now())
        .await
        .unwrap();

    let err = ctx
        .service
        .request_key(ctx.attendee.id, ctx.event.id)
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::BadRequest(_)));
}

#[tokio::test]
async fn test_missing_identifiers_are_rejected() {
    let ctx = setup(5).await;

    let nil_user = ctx.service.request_key(Uuid::nil(), ctx.event.id).await;
    let null_event = ctx
        .service
        .request_key(ctx.attendee.id, program_event::NULL_EVENT_ID)
        .await;

    assert!(matches!(nil_user, Err(ServiceError::BadRequest(_))));
    assert!(matches!(null_event, Err(ServiceError::BadRequest(_))));
}

#[tokio::test]
async fn test_completed_attendance_gets_no_new_key() {
    let ctx = setup(5).await;
    let key = ctx.service.request_key(ctx.attendee.id, ctx.event.id).await.unwrap();
    ctx.service
        .complete_by_key(&key.qr_code_key, ctx.signer.id, ctx.now())
        .await
        .unwrap();

    let err = ctx
        .service
        .request_key(ctx.attendee.id, ctx.event.id)
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::BadRequest(_)));
    let row = ctx.attendance(ctx.attendee.id).await.unwrap();
    assert!(row.is_completed());
    assert!(!row.has_live_key(ctx.now()));
}

#[tokio::test]
async fn test_clean_releases_only_keys_past_grace() {
    let ctx = setup(5).await;
    ctx.service
        .request_key(ctx.attendee.id, ctx.event.id)
        .await
        .unwrap();
    ctx.advance(Duration::days(3));
    ctx.service
        .request_key(ctx.other_attendee.id, ctx.event.id)
        .await
        .unwrap();

    // Attendee's key expired 5 days + 1 hour ago, the other one 2 days + 1 hour ago.
    ctx.advance(Duration::days(3) + Duration::hours(1));
    let released = ctx.service.clean().await.unwrap();

    assert_eq!(released, 1);
    let first = ctx.attendance(ctx.attendee.id).await.unwrap();
    let second = ctx.attendance(ctx.other_attendee.id).await.unwrap();
    assert!(first.qr_code_key.is_none());
    assert!(second.qr_code_key.is_some());
}
