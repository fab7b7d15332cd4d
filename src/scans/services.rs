use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::dto::{ClientMessage, ConfirmScanRequest, ProtocolError, ScanRequest, ServerMessage};
use super::history::{self, HistorySummary, HISTORY_LIMIT};
use super::repo_types::{ConfirmedScan, NutritionalInfo, ScanStatus};
use crate::error::SessionError;
use crate::state::AppState;

/// Produces the reply for one parsed inbound frame. Failures of any kind
/// become an `error` message.
pub async fn respond(st: &AppState, parsed: Result<ClientMessage, ProtocolError>) -> ServerMessage {
    let outcome = match parsed {
        Ok(msg) => dispatch(st, msg).await,
        Err(e) => Err(e.into()),
    };
    outcome.unwrap_or_else(|e| {
        warn!(error = %e, "message rejected");
        ServerMessage::error(e.to_string())
    })
}

/// Scans and rejected frames never read or write the repository, so they
/// may run while earlier messages of the same connection are still busy.
/// Everything else must wait for those to finish.
pub fn may_overlap(parsed: &Result<ClientMessage, ProtocolError>) -> bool {
    matches!(parsed, Ok(ClientMessage::Scan(_)) | Err(_))
}

async fn dispatch(st: &AppState, msg: ClientMessage) -> Result<ServerMessage, SessionError> {
    match msg {
        ClientMessage::Scan(req) => scan(st, req)
            .await
            .map(|data| ServerMessage::ScanResult { data }),
        ClientMessage::ConfirmScan(req) => confirm_scan(st, req)
            .await
            .map(|()| ServerMessage::ScanSaved { data: () }),
        ClientMessage::GetHistory => history(st)
            .await
            .map(|data| ServerMessage::History { data }),
    }
}

/// Runs the analyzer on the image and parks the image until the client
/// confirms the returned draft.
#[instrument(skip_all, fields(bytes = req.image.len(), total_weight = req.total_weight))]
pub async fn scan(st: &AppState, req: ScanRequest) -> Result<NutritionalInfo, SessionError> {
    let deadline = st.config.analyzer.timeout;
    let draft = match tokio::time::timeout(deadline, st.analyzer.analyze(&req.image)).await {
        Ok(Ok(draft)) => draft,
        Ok(Err(e)) => {
            error!(error = %e, "image analysis failed");
            return Err(SessionError::Analysis(e));
        }
        Err(_) => {
            warn!(?deadline, "image analysis timed out");
            return Err(SessionError::AnalysisTimeout);
        }
    };

    let info = NutritionalInfo::from_draft(Uuid::new_v4().to_string(), req.total_weight, draft);
    st.pending.put(info.id.clone(), req.image);

    info!(
        scan_id = %info.id,
        calories = info.calories,
        protein = info.protein,
        carbs = info.carbs,
        fat = info.fat,
        "label analyzed"
    );
    Ok(info)
}

/// Commits a confirmed draft. The pending image is consumed before the
/// writes, so a failed save cannot be retried with the same id.
#[instrument(skip_all, fields(scan_id = %req.id))]
pub async fn confirm_scan(st: &AppState, req: ConfirmScanRequest) -> Result<(), SessionError> {
    let Some(image) = st.pending.take(&req.id) else {
        warn!(pending = st.pending.len(), "no pending scan for id");
        return Err(SessionError::PendingNotFound);
    };

    let now = OffsetDateTime::now_utc();
    let info = NutritionalInfo {
        id: req.id,
        total_weight: req.total_weight,
        calories: req.calories,
        protein: req.protein,
        carbs: req.carbs,
        fat: req.fat,
        fiber: req.fiber,
        sugar: req.sugar,
        image_path: None,
        created_at: now,
        updated_at: now,
    };

    if let Err(e) = st.repo.save_nutritional_info(&info).await {
        error!(error = %e, "save nutritional info failed");
        return Err(SessionError::SaveResults(e));
    }

    let scan = ConfirmedScan {
        id: Uuid::new_v4().to_string(),
        image_data: image.to_vec(),
        status: ScanStatus::Completed,
        error: None,
        result: info,
        created_at: now,
        updated_at: now,
    };
    if let Err(e) = st.repo.save_scan(&scan).await {
        error!(error = %e, "save scan failed");
        return Err(SessionError::SaveScan(e));
    }

    info!(confirmed_scan = %scan.id, "scan saved");
    Ok(())
}

#[instrument(skip_all)]
pub async fn history(st: &AppState) -> Result<HistorySummary, SessionError> {
    let items = st
        .repo
        .recent_nutritional_info(HISTORY_LIMIT)
        .await
        .map_err(|e| {
            error!(error = %e, "load history failed");
            SessionError::History(e)
        })?;
    Ok(history::summarize(history::local_now(), items))
}


#[cfg(test)]
mod session_tests {
    use std::collections::HashSet;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Value};

    use super::testing::*;
    use super::*;
    use crate::scans::repo::{MemoryRepository, Repository};

    const IMAGE_B64: &str = "/9j/4AAQSkZJRg=="; // jpeg magic

    fn state_with(repo: Arc<FlakyRepository>) -> AppState {
        AppState::fake(FixedAnalyzer::apple(), repo)
    }

    async fn send(st: &AppState, msg: Value) -> Value {
        reply(st, &msg.to_string()).await
    }

    async fn reply(st: &AppState, text: &str) -> Value {
        serde_json::to_value(respond(st, ClientMessage::parse(text)).await).unwrap()
    }

    fn scan_msg(weight: f64) -> Value {
        json!({"type": "scan", "data": {"image": IMAGE_B64, "totalWeight": weight}})
    }

    fn confirm_msg(id: &str) -> Value {
        json!({"type": "confirm_scan", "data": {
            "id": id, "total_weight": 250, "calories": 52, "protein": 0.3,
            "carbs": 14, "fat": 0.2, "fiber": 2.4, "sugar": 10
        }})
    }

    #[tokio::test]
    async fn scan_confirm_history_end_to_end() {
        let repo = Arc::new(FlakyRepository::default());
        let st = state_with(repo.clone());

        let result = send(&st, scan_msg(250.0)).await;
        assert_eq!(result["type"], "scan_result");
        let data = &result["data"];
        let id = data["id"].as_str().unwrap().to_string();
        assert!(!id.is_empty());
        assert_eq!(data["total_weight"], 250.0);
        assert_eq!(data["calories"], 52.0);
        assert_eq!(data["protein"], 0.3);
        assert_eq!(data["carbs"], 14.0);
        assert_eq!(data["fat"], 0.2);
        assert_eq!(data["fiber"], 2.4);
        assert_eq!(data["sugar"], 10.0);

        let saved = send(&st, confirm_msg(&id)).await;
        assert_eq!(saved, json!({"type": "scan_saved", "data": null}));

        let scan = repo.inner.scan_for(&id).expect("scan persisted");
        assert_eq!(scan.status, ScanStatus::Completed);
        assert_eq!(scan.image_data, vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46]);
        assert_eq!(scan.result.calories, APPLE.calories);
        assert_eq!(scan.result.sugar, APPLE.sugar);

        let stored = repo.nutritional_info(&id).await.unwrap().expect("info persisted");
        assert_eq!(stored.total_weight, 250.0);
        assert_eq!(stored.fiber, 2.4);

        let hist = send(&st, json!({"type": "get_history"})).await;
        assert_eq!(hist["type"], "history");
        assert_eq!(hist["data"]["items"][0]["id"], id.as_str());
        assert!(hist["data"]["day_total"]["calories"].as_f64().unwrap() >= 52.0);
        assert!(hist["data"]["week_total"]["calories"].as_f64().unwrap() >= 52.0);
    }

    #[tokio::test]
    async fn scan_ids_are_fresh() {
        let st = state_with(Arc::new(FlakyRepository::default()));
        let mut seen = HashSet::new();
        for _ in 0..10 {
            let r = send(&st, scan_msg(100.0)).await;
            assert!(seen.insert(r["data"]["id"].as_str().unwrap().to_string()));
        }
        assert_eq!(st.pending.len(), 10);
    }

    #[tokio::test]
    async fn unknown_type_is_an_error() {
        let st = state_with(Arc::new(FlakyRepository::default()));
        let r = send(&st, json!({"type": "ping"})).await;
        assert_eq!(r, json!({"type": "error", "message": "Unknown message type"}));
    }

    #[tokio::test]
    async fn confirm_of_never_issued_id_fails() {
        let repo = Arc::new(FlakyRepository::default());
        let st = state_with(repo.clone());
        let r = send(&st, confirm_msg("never-issued")).await;
        assert_eq!(r, json!({"type": "error", "message": "Image data not found"}));
        assert!(repo.inner.recent_nutritional_info(20).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_confirm_misses() {
        let st = state_with(Arc::new(FlakyRepository::default()));
        let id = send(&st, scan_msg(80.0)).await["data"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        assert_eq!(send(&st, confirm_msg(&id)).await["type"], "scan_saved");
        assert_eq!(send(&st, confirm_msg(&id)).await["type"], "error");
    }

    #[tokio::test]
    async fn racing_confirms_commit_once() {
        let repo = Arc::new(FlakyRepository::default());
        let st = state_with(repo.clone());
        let draft = scan(
            &st,
            ScanRequest {
                image: bytes::Bytes::from_static(b"img"),
                total_weight: 100.0,
            },
        )
        .await
        .unwrap();

        let req = |id: &str| ConfirmScanRequest {
            id: id.to_string(),
            total_weight: 100.0,
            calories: 1.0,
            protein: 0.0,
            carbs: 0.0,
            fat: 0.0,
            fiber: 0.0,
            sugar: 0.0,
        };
        let (a, b) = tokio::join!(
            confirm_scan(&st, req(&draft.id)),
            confirm_scan(&st, req(&draft.id))
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert_eq!(repo.inner.scan_count(), 1);
    }

    #[tokio::test]
    async fn partial_confirm_uses_defaults() {
        let repo = Arc::new(FlakyRepository::default());
        let st = state_with(repo.clone());
        let id = send(&st, scan_msg(80.0)).await["data"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let r = send(
            &st,
            json!({"type": "confirm_scan", "data": {"id": id, "calories": "?", "fat": 9}}),
        )
        .await;
        assert_eq!(r["type"], "scan_saved");

        let saved = &repo.inner.recent_nutritional_info(1).await.unwrap()[0];
        assert_eq!(saved.total_weight, 100.0);
        assert_eq!(saved.calories, 0.0);
        assert_eq!(saved.fat, 9.0);
    }

    #[tokio::test]
    async fn analyzer_failure_is_generic_and_leaves_nothing_pending() {
        let st = AppState::fake(Arc::new(RejectingAnalyzer), Arc::new(MemoryRepository::new()));
        let r = send(&st, scan_msg(100.0)).await;
        assert_eq!(r, json!({"type": "error", "message": "Failed to process image"}));
        assert!(st.pending.is_empty());
    }

    #[tokio::test]
    async fn analyzer_deadline() {
        let st = AppState::fake(
            FixedAnalyzer::slow(Duration::from_secs(5)),
            Arc::new(MemoryRepository::new()),
        );
        let r = send(&st, scan_msg(100.0)).await;
        assert_eq!(r["message"], "Image analysis timed out");
        assert!(st.pending.is_empty());
    }

    #[tokio::test]
    async fn failed_save_does_not_restore_pending_scan() {
        let repo = Arc::new(FlakyRepository::default());
        let st = state_with(repo.clone());
        let id = send(&st, scan_msg(80.0)).await["data"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        repo.fail_info.store(true, Ordering::SeqCst);
        let r = send(&st, confirm_msg(&id)).await;
        assert_eq!(r["message"], "Failed to save results");

        repo.fail_info.store(false, Ordering::SeqCst);
        let r = send(&st, confirm_msg(&id)).await;
        assert_eq!(r["message"], "Image data not found");
    }

    #[tokio::test]
    async fn failed_scan_save_reports_error() {
        let repo = Arc::new(FlakyRepository::default());
        repo.fail_scan.store(true, Ordering::SeqCst);
        let st = state_with(repo.clone());
        let id = send(&st, scan_msg(80.0)).await["data"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let r = send(&st, confirm_msg(&id)).await;
        assert_eq!(r["message"], "Failed to save scan");
        assert_eq!(repo.inner.scan_count(), 0);
        assert!(st.pending.is_empty());
    }

    #[tokio::test]
    async fn history_failure_is_reported() {
        let repo = Arc::new(FlakyRepository::default());
        repo.fail_recent.store(true, Ordering::SeqCst);
        let st = state_with(repo);
        let r = send(&st, json!({"type": "get_history"})).await;
        assert_eq!(r, json!({"type": "error", "message": "Failed to retrieve history"}));
    }

    #[test]
    fn only_scans_and_rejects_overlap() {
        assert!(may_overlap(&ClientMessage::parse(&scan_msg(1.0).to_string())));
        assert!(may_overlap(&ClientMessage::parse("garbage")));
        assert!(!may_overlap(&ClientMessage::parse(r#"{"type":"get_history"}"#)));
        assert!(!may_overlap(&ClientMessage::parse(&confirm_msg("x").to_string())));
    }

    #[tokio::test]
    async fn malformed_frames_are_errors() {
        let st = state_with(Arc::new(FlakyRepository::default()));
        let r = reply(&st, "not json").await;
        assert_eq!(r["message"], "Invalid message format");

        let r = send(&st, json!({"type": "scan", "data": {"image": "%%%", "totalWeight": 1}})).await;
        assert_eq!(r["message"], "Invalid image format");
    }
}
