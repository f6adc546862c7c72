// src/engine.rs
//
// The asset orchestration engine: single owner of the idea list, the asset
// map and the design analysis. Every user intent is dispatched through here;
// the HTTP layer only ever sees immutable snapshots.
//
// Concurrency model: all state sits behind one async mutex. Preconditions
// are checked and busy flags set under the lock before a gateway call is
// issued; the lock is released across the await so other intents stay
// responsive; results are applied under the lock again after re-validating
// that the asset (and the brief it belongs to) still exists. Busy flags and
// status checks, not queues, are what serialize per-asset operations: a
// conflicting request is rejected, never queued. A monotonically increasing
// brief epoch is the stale-response token for superseded submissions.

use crate::errors::StudioError;
use crate::models::*;
use crate::services::GenerationGateway;
use crate::services::image_codec;
use chrono::Utc;
use futures_util::future::join_all;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

const PLACEHOLDER_COUNT: usize = 4;
const BACKGROUND_REMOVAL_INSTRUCTION: &str = "Remove background. Return transparent PNG.";
const BULK_FAILURE_NOTICE: &str = "Bulk processing encountered errors.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkOutcome {
    pub processed: usize,
    pub failed: usize,
}

#[derive(Default)]
struct StudioState {
    ideas: Vec<AssetIdea>,
    assets: HashMap<Uuid, AssetState>,
    analysis: Option<DesignAnalysis>,
    last_input: Option<GenerateInput>,
    brief_epoch: u64,
    is_generating_ideas: bool,
    is_loading_more: bool,
    is_bulk_processing: bool,
    last_error: Option<String>,
}

pub struct StudioEngine {
    gateway: Arc<dyn GenerationGateway>,
    state: Mutex<StudioState>,
}

impl StudioEngine {
    pub fn new(gateway: Arc<dyn GenerationGateway>) -> Self {
        Self {
            gateway,
            state: Mutex::new(StudioState::default()),
        }
    }

    /// Submit a new brief. Clears all prior ideas, assets and analysis,
    /// installs placeholder ideas for the loading view, then asks the gateway
    /// for a fresh batch. A submission superseded by a newer one has its
    /// eventual response discarded rather than applied.
    pub async fn submit_brief(&self, input: GenerateInput) -> Result<(), StudioError> {
        let epoch = {
            let mut state = self.state.lock().await;
            state.brief_epoch += 1;
            state.ideas = (0..PLACEHOLDER_COUNT)
                .map(|_| AssetIdea::placeholder())
                .collect();
            state.assets.clear();
            state.analysis = None;
            state.last_error = None;
            state.is_generating_ideas = true;
            state.is_loading_more = false;
            state.last_input = Some(input.clone());
            state.brief_epoch
        };

        let result = self.gateway.generate_ideas(&input, 0).await;

        let mut state = self.state.lock().await;
        if state.brief_epoch != epoch {
            info!("Discarding superseded brief submission");
            return Ok(());
        }
        state.is_generating_ideas = false;
        match result {
            Ok(batch) => {
                info!("Brief produced {} ideas", batch.ideas.len());
                state.analysis = batch.analysis;
                state.ideas = batch.ideas;
                Ok(())
            }
            Err(err) => {
                warn!("Idea generation failed: {}", err);
                state.ideas.clear();
                state.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Extend the current idea list. No-op without a prior brief. Appends in
    /// arrival order without touching existing assets; failure leaves the
    /// existing ideas untouched.
    pub async fn load_more(&self) -> Result<bool, StudioError> {
        let (input, existing_count, epoch) = {
            let mut state = self.state.lock().await;
            let Some(input) = state.last_input.clone() else {
                return Ok(false);
            };
            if state.is_generating_ideas || state.is_loading_more {
                return Err(StudioError::Busy(
                    "an ideas request is already in flight".to_string(),
                ));
            }
            state.is_loading_more = true;
            state.last_error = None;
            (input, state.ideas.len(), state.brief_epoch)
        };

        let result = self.gateway.generate_ideas(&input, existing_count).await;

        let mut state = self.state.lock().await;
        if state.brief_epoch != epoch {
            return Ok(false);
        }
        state.is_loading_more = false;
        match result {
            Ok(batch) => {
                if batch.analysis.is_some() {
                    state.analysis = batch.analysis;
                }
                state.ideas.extend(batch.ideas);
                Ok(true)
            }
            Err(err) => {
                warn!("Load more failed: {}", err);
                state.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Generate (or retry) the image for one idea. A second call while a
    /// generation is already in flight for the same id is rejected so no
    /// duplicate gateway request is issued.
    pub async fn generate(&self, idea_id: Uuid) -> Result<(), StudioError> {
        let (idea, epoch) = {
            let mut state = self.state.lock().await;
            if state.is_generating_ideas {
                return Err(StudioError::Precondition(
                    "ideas are still being generated".to_string(),
                ));
            }
            let idea = state
                .ideas
                .iter()
                .find(|idea| idea.id == idea_id)
                .cloned()
                .ok_or_else(|| StudioError::NotFound(format!("no idea with id {}", idea_id)))?;

            if let Some(existing) = state.assets.get(&idea_id) {
                if existing.status == AssetStatus::Generating {
                    return Err(StudioError::Busy(
                        "generation already in flight for this asset".to_string(),
                    ));
                }
                if existing.is_busy() {
                    return Err(StudioError::Busy(
                        "another operation is in flight for this asset".to_string(),
                    ));
                }
            }

            let bookmarked = state
                .assets
                .get(&idea_id)
                .map(|asset| asset.is_bookmarked)
                .unwrap_or(false);
            state
                .assets
                .insert(idea_id, AssetState::generating(idea.clone(), bookmarked));
            (idea, state.brief_epoch)
        };

        let result = self.gateway.generate_image(&idea.prompt).await;

        let mut state = self.state.lock().await;
        if state.brief_epoch != epoch {
            return Ok(());
        }
        let Some(asset) = state.assets.get_mut(&idea_id) else {
            return Ok(());
        };
        match result {
            Ok(payload) => {
                asset.image_url = image_codec::to_data_url(&payload);
                asset.mime_type = payload.mime_type;
                asset.status = AssetStatus::Completed;
                asset.error = None;
                asset.video_url = None;
                asset.generated_at = Some(Utc::now());
                Ok(())
            }
            Err(err) => {
                warn!("Asset {} generation failed: {}", idea_id, err);
                asset.status = AssetStatus::Error;
                asset.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Flip the bookmark on a completed asset. A toggle on a missing or
    /// non-completed asset is a harmless click, silently ignored.
    pub async fn toggle_bookmark(&self, asset_id: Uuid) {
        let mut state = self.state.lock().await;
        if let Some(asset) = state.assets.get_mut(&asset_id) {
            if asset.status == AssetStatus::Completed {
                asset.is_bookmarked = !asset.is_bookmarked;
            }
        }
    }

    /// Edit a completed asset's image. A successful edit replaces the image
    /// and clears any paired video, which no longer matches the new still.
    pub async fn edit(
        &self,
        asset_id: Uuid,
        instruction: &str,
        reference: Option<ImagePayload>,
    ) -> Result<String, StudioError> {
        if instruction.trim().is_empty() {
            return Err(StudioError::Validation(
                "edit instruction must not be empty".to_string(),
            ));
        }

        let base = {
            let mut state = self.state.lock().await;
            let asset = Self::completed_asset_mut(&mut state, asset_id)?;
            Self::require_idle(asset)?;
            let base = image_codec::from_data_url(&asset.image_url)?;
            asset.is_editing = true;
            asset.error = None;
            base
        };

        let result = self
            .gateway
            .edit_image(&base, instruction, reference.as_ref())
            .await;

        let mut state = self.state.lock().await;
        let asset = state
            .assets
            .get_mut(&asset_id)
            .ok_or_else(|| StudioError::NotFound("asset no longer exists".to_string()))?;
        asset.is_editing = false;
        match result {
            Ok(payload) => {
                asset.image_url = image_codec::to_data_url(&payload);
                asset.mime_type = payload.mime_type;
                asset.video_url = None;
                Ok(asset.image_url.clone())
            }
            Err(err) => {
                asset.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Animate a completed asset's image. The busy flag is raised before the
    /// gateway call so the tile can show progress; the previous video is
    /// cleared for the duration.
    pub async fn animate(
        &self,
        asset_id: Uuid,
        instruction: Option<String>,
    ) -> Result<String, StudioError> {
        let (base, prompt) = {
            let mut state = self.state.lock().await;
            let asset = Self::completed_asset_mut(&mut state, asset_id)?;
            Self::require_idle(asset)?;
            let base = image_codec::from_data_url(&asset.image_url)?;
            let prompt = instruction
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| asset.idea.animation_prompt.clone());
            asset.is_animating = true;
            asset.video_url = None;
            asset.error = None;
            (base, prompt)
        };

        let result = self.gateway.animate_image(&base, &prompt).await;

        let mut state = self.state.lock().await;
        let asset = state
            .assets
            .get_mut(&asset_id)
            .ok_or_else(|| StudioError::NotFound("asset no longer exists".to_string()))?;
        asset.is_animating = false;
        match result {
            Ok(video_url) => {
                asset.video_url = Some(video_url.clone());
                Ok(video_url)
            }
            Err(err) => {
                warn!("Animation for {} failed: {}", asset_id, err);
                asset.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Strip the background from a completed asset. An asset that already has
    /// a paired video refuses the operation, since the video would become
    /// stale relative to the stripped image. A failure leaves the asset
    /// completed and usable, with the error recorded on the tile.
    pub async fn remove_background(&self, asset_id: Uuid) -> Result<(), StudioError> {
        let base = {
            let mut state = self.state.lock().await;
            let asset = Self::completed_asset_mut(&mut state, asset_id)?;
            Self::require_idle(asset)?;
            if asset.video_url.is_some() {
                return Err(StudioError::Precondition(
                    "asset has an animation; removing the background would orphan it".to_string(),
                ));
            }
            let base = image_codec::from_data_url(&asset.image_url)?;
            asset.is_removing_background = true;
            asset.error = None;
            base
        };

        let result = self
            .gateway
            .edit_image(&base, BACKGROUND_REMOVAL_INSTRUCTION, None)
            .await;

        let mut state = self.state.lock().await;
        let Some(asset) = state.assets.get_mut(&asset_id) else {
            return Ok(());
        };
        asset.is_removing_background = false;
        match result {
            Ok(payload) => {
                asset.image_url = image_codec::to_data_url(&payload);
                asset.mime_type = payload.mime_type;
                asset.video_url = None;
                Ok(())
            }
            Err(err) => {
                warn!("Background removal for {} failed: {}", asset_id, err);
                asset.error = Some("Background removal failed".to_string());
                Err(err)
            }
        }
    }

    /// Fan background removal out over every bookmarked image asset, all at
    /// once. Individual failures do not roll back the successes; one summary
    /// notice covers them.
    pub async fn bulk_remove_background(&self) -> Result<BulkOutcome, StudioError> {
        let targets: Vec<Uuid> = {
            let mut state = self.state.lock().await;
            if state.is_bulk_processing {
                return Err(StudioError::Busy(
                    "bulk background removal already running".to_string(),
                ));
            }
            let targets = Self::ordered_assets(&state)
                .into_iter()
                .filter(|asset| {
                    asset.is_bookmarked
                        && asset.status == AssetStatus::Completed
                        && asset.video_url.is_none()
                })
                .map(|asset| asset.id)
                .collect::<Vec<_>>();
            if targets.is_empty() {
                return Ok(BulkOutcome {
                    processed: 0,
                    failed: 0,
                });
            }
            state.is_bulk_processing = true;
            state.last_error = None;
            targets
        };

        let results = join_all(targets.iter().map(|id| self.remove_background(*id))).await;
        let failed = results.iter().filter(|result| result.is_err()).count();

        let mut state = self.state.lock().await;
        state.is_bulk_processing = false;
        if failed > 0 {
            state.last_error = Some(BULK_FAILURE_NOTICE.to_string());
        }
        info!(
            "Bulk background removal finished: {} ok, {} failed",
            targets.len() - failed,
            failed
        );
        Ok(BulkOutcome {
            processed: targets.len() - failed,
            failed,
        })
    }

    pub async fn dismiss_error(&self) {
        self.state.lock().await.last_error = None;
    }

    /// Immutable snapshot of the whole studio, assets in idea-list order.
    pub async fn snapshot(&self) -> StudioSnapshot {
        let state = self.state.lock().await;
        StudioSnapshot {
            ideas: state.ideas.clone(),
            assets: Self::ordered_assets(&state),
            analysis: state.analysis.clone(),
            is_generating_ideas: state.is_generating_ideas,
            is_loading_more: state.is_loading_more,
            is_bulk_processing: state.is_bulk_processing,
            last_error: state.last_error.clone(),
        }
    }

    /// Bookmarked completed assets, in idea-list order so the library stays
    /// stable across re-renders.
    pub async fn bookmarked_assets(&self) -> Vec<AssetState> {
        let state = self.state.lock().await;
        Self::ordered_assets(&state)
            .into_iter()
            .filter(|asset| asset.is_bookmarked && asset.status == AssetStatus::Completed)
            .collect()
    }

    pub async fn asset(&self, asset_id: Uuid) -> Option<AssetState> {
        self.state.lock().await.assets.get(&asset_id).cloned()
    }

    fn ordered_assets(state: &StudioState) -> Vec<AssetState> {
        state
            .ideas
            .iter()
            .filter_map(|idea| state.assets.get(&idea.id))
            .cloned()
            .collect()
    }

    fn completed_asset_mut(
        state: &mut StudioState,
        asset_id: Uuid,
    ) -> Result<&mut AssetState, StudioError> {
        let asset = state
            .assets
            .get_mut(&asset_id)
            .ok_or_else(|| StudioError::NotFound(format!("no asset with id {}", asset_id)))?;
        if asset.status != AssetStatus::Completed {
            return Err(StudioError::Precondition(
                "asset has not completed generation".to_string(),
            ));
        }
        Ok(asset)
    }

    fn require_idle(asset: &AssetState) -> Result<(), StudioError> {
        if asset.is_busy() {
            return Err(StudioError::Busy(
                "another operation is in flight for this asset".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gateway::testing::ScriptedGateway;
    use std::sync::atomic::Ordering;

    fn idea(section: &str) -> AssetIdea {
        AssetIdea {
            id: Uuid::new_v4(),
            section: section.to_string(),
            description: format!("{} description", section),
            prompt: format!("render a {}", section),
            animation_prompt: "Subtle fade-in and upward drift".to_string(),
        }
    }

    fn payload(tag: &str) -> ImagePayload {
        ImagePayload {
            base64: format!("bytes-{}", tag),
            mime_type: "image/png".to_string(),
        }
    }

    fn batch(sections: &[&str]) -> IdeaBatch {
        IdeaBatch {
            ideas: sections.iter().map(|s| idea(s)).collect(),
            analysis: None,
        }
    }

    fn analyzed_batch(sections: &[&str], score: u8) -> IdeaBatch {
        IdeaBatch {
            analysis: Some(DesignAnalysis {
                score,
                style: "minimalist".to_string(),
                palette: vec!["#102030".to_string(), "#aabbcc".to_string()],
                critique: "Clean but undifferentiated.".to_string(),
                improvements: vec!["Stronger hero imagery".to_string()],
            }),
            ..batch(sections)
        }
    }

    fn studio() -> (Arc<StudioEngine>, Arc<ScriptedGateway>) {
        let gateway = Arc::new(ScriptedGateway::new());
        let engine = Arc::new(StudioEngine::new(gateway.clone()));
        (engine, gateway)
    }

    /// Submit a brief and generate one completed asset, returning its id.
    async fn completed_asset(engine: &StudioEngine, gateway: &ScriptedGateway) -> Uuid {
        gateway.push_ideas(Ok(batch(&["Hero Banner"])));
        engine
            .submit_brief(GenerateInput::Text {
                value: "brief".to_string(),
            })
            .await
            .expect("brief succeeds");
        let id = engine.snapshot().await.ideas[0].id;
        gateway.push_image(Ok(payload("original")));
        engine.generate(id).await.expect("generation succeeds");
        id
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn brief_shows_placeholders_then_real_ideas_with_analysis() {
        let (engine, gateway) = studio();
        let release = gateway.push_ideas_gated(Ok(analyzed_batch(
            &["Hero Banner", "Feature Card", "Testimonial", "Footer CTA"],
            78,
        )));

        let task = tokio::spawn({
            let engine = engine.clone();
            async move {
                engine
                    .submit_brief(GenerateInput::Text {
                        value: "minimalist SaaS landing page".to_string(),
                    })
                    .await
            }
        });
        settle().await;

        let mid_flight = engine.snapshot().await;
        assert!(mid_flight.is_generating_ideas);
        assert_eq!(mid_flight.ideas.len(), 4);
        assert!(mid_flight.ideas.iter().all(|i| i.prompt.is_empty()));

        release.send(()).unwrap();
        task.await.unwrap().expect("brief succeeds");

        let done = engine.snapshot().await;
        assert!(!done.is_generating_ideas);
        assert_eq!(done.ideas[0].section, "Hero Banner");
        assert_eq!(done.ideas[3].section, "Footer CTA");
        assert_eq!(done.analysis.expect("analysis present").score, 78);
    }

    #[tokio::test]
    async fn generation_transitions_through_generating_to_completed() {
        let (engine, gateway) = studio();
        gateway.push_ideas(Ok(batch(&["Hero Banner"])));
        engine
            .submit_brief(GenerateInput::Text {
                value: "brief".to_string(),
            })
            .await
            .unwrap();
        let id = engine.snapshot().await.ideas[0].id;

        let release = gateway.push_image_gated(Ok(payload("hero")));
        let task = tokio::spawn({
            let engine = engine.clone();
            async move { engine.generate(id).await }
        });
        settle().await;

        let asset = engine.asset(id).await.expect("asset created");
        assert_eq!(asset.status, AssetStatus::Generating);
        assert!(asset.image_url.is_empty());

        release.send(()).unwrap();
        task.await.unwrap().expect("generation succeeds");

        let asset = engine.asset(id).await.unwrap();
        assert_eq!(asset.status, AssetStatus::Completed);
        assert!(asset.image_url.starts_with("data:image/png;base64,"));
        assert!(asset.generated_at.is_some());
    }

    #[tokio::test]
    async fn concurrent_generate_does_not_duplicate_the_gateway_request() {
        let (engine, gateway) = studio();
        gateway.push_ideas(Ok(batch(&["Hero Banner"])));
        engine
            .submit_brief(GenerateInput::Text {
                value: "brief".to_string(),
            })
            .await
            .unwrap();
        let id = engine.snapshot().await.ideas[0].id;

        let release = gateway.push_image_gated(Ok(payload("hero")));
        let task = tokio::spawn({
            let engine = engine.clone();
            async move { engine.generate(id).await }
        });
        settle().await;

        let second = engine.generate(id).await;
        assert!(matches!(second, Err(StudioError::Busy(_))));
        assert_eq!(gateway.image_requests.load(Ordering::SeqCst), 1);

        release.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn failed_generation_lands_in_error_and_retry_recovers() {
        let (engine, gateway) = studio();
        gateway.push_ideas(Ok(batch(&["Hero Banner"])));
        engine
            .submit_brief(GenerateInput::Text {
                value: "brief".to_string(),
            })
            .await
            .unwrap();
        let id = engine.snapshot().await.ideas[0].id;

        gateway.push_image(Err("model overloaded"));
        assert!(engine.generate(id).await.is_err());
        let asset = engine.asset(id).await.unwrap();
        assert_eq!(asset.status, AssetStatus::Error);
        assert!(asset.error.as_deref().unwrap().contains("model overloaded"));
        assert!(asset.image_url.is_empty());

        gateway.push_image(Ok(payload("second try")));
        engine.generate(id).await.expect("retry succeeds");
        assert_eq!(
            engine.asset(id).await.unwrap().status,
            AssetStatus::Completed
        );
    }

    #[tokio::test]
    async fn bookmark_toggle_is_idempotent_over_two_flips() {
        let (engine, gateway) = studio();
        let id = completed_asset(&engine, &gateway).await;

        assert!(!engine.asset(id).await.unwrap().is_bookmarked);
        engine.toggle_bookmark(id).await;
        assert!(engine.asset(id).await.unwrap().is_bookmarked);
        engine.toggle_bookmark(id).await;
        assert!(!engine.asset(id).await.unwrap().is_bookmarked);
    }

    #[tokio::test]
    async fn bookmark_on_absent_or_unfinished_asset_is_a_silent_noop() {
        let (engine, gateway) = studio();
        gateway.push_ideas(Ok(batch(&["Hero Banner"])));
        engine
            .submit_brief(GenerateInput::Text {
                value: "brief".to_string(),
            })
            .await
            .unwrap();
        let id = engine.snapshot().await.ideas[0].id;

        // No asset yet.
        engine.toggle_bookmark(id).await;
        assert!(engine.asset(id).await.is_none());

        // Errored asset: still not bookmarkable.
        gateway.push_image(Err("boom"));
        let _ = engine.generate(id).await;
        engine.toggle_bookmark(id).await;
        assert!(!engine.asset(id).await.unwrap().is_bookmarked);
    }

    #[tokio::test]
    async fn secondary_operations_require_a_completed_asset() {
        let (engine, gateway) = studio();
        gateway.push_ideas(Ok(batch(&["Hero Banner"])));
        engine
            .submit_brief(GenerateInput::Text {
                value: "brief".to_string(),
            })
            .await
            .unwrap();
        let id = engine.snapshot().await.ideas[0].id;

        gateway.push_image(Err("boom"));
        let _ = engine.generate(id).await;
        let before = engine.asset(id).await.unwrap();

        assert!(matches!(
            engine.edit(id, "make it blue", None).await,
            Err(StudioError::Precondition(_))
        ));
        assert!(matches!(
            engine.animate(id, None).await,
            Err(StudioError::Precondition(_))
        ));
        assert!(matches!(
            engine.remove_background(id).await,
            Err(StudioError::Precondition(_))
        ));

        let after = engine.asset(id).await.unwrap();
        assert_eq!(after.status, before.status);
        assert_eq!(after.image_url, before.image_url);
        assert!(!after.is_busy());
    }

    #[tokio::test]
    async fn successful_edit_replaces_image_and_clears_video() {
        let (engine, gateway) = studio();
        let id = completed_asset(&engine, &gateway).await;

        gateway.push_video(Ok("https://example.com/clip.mp4".to_string()));
        engine.animate(id, None).await.expect("animation succeeds");
        assert!(engine.asset(id).await.unwrap().video_url.is_some());

        gateway.push_edit(Ok(payload("edited")));
        let new_url = engine
            .edit(id, "make the sky pink", None)
            .await
            .expect("edit succeeds");

        let asset = engine.asset(id).await.unwrap();
        assert_eq!(asset.image_url, new_url);
        assert!(asset.image_url.contains("bytes-edited"));
        assert!(asset.video_url.is_none(), "stale animation must be cleared");
        assert_eq!(asset.status, AssetStatus::Completed);
        assert!(!asset.is_editing);
    }

    #[tokio::test]
    async fn failed_edit_keeps_the_asset_completed_with_an_error_note() {
        let (engine, gateway) = studio();
        let id = completed_asset(&engine, &gateway).await;
        let before = engine.asset(id).await.unwrap();

        gateway.push_edit(Err("no image part"));
        assert!(engine.edit(id, "make it blue", None).await.is_err());

        let after = engine.asset(id).await.unwrap();
        assert_eq!(after.status, AssetStatus::Completed);
        assert_eq!(after.image_url, before.image_url);
        assert!(after.error.is_some());
        assert!(!after.is_editing);
    }

    #[tokio::test]
    async fn animation_sets_busy_flag_and_blocks_background_removal() {
        let (engine, gateway) = studio();
        let id = completed_asset(&engine, &gateway).await;

        let release = gateway.push_video_gated(Ok("https://example.com/clip.mp4".to_string()));
        let task = tokio::spawn({
            let engine = engine.clone();
            async move { engine.animate(id, Some("slow zoom".to_string())).await }
        });
        settle().await;

        assert!(engine.asset(id).await.unwrap().is_animating);
        let conflict = engine.remove_background(id).await;
        assert!(matches!(conflict, Err(StudioError::Busy(_))));
        assert!(
            engine.asset(id).await.unwrap().is_animating,
            "rejected call must not disturb the running one"
        );

        release.send(()).unwrap();
        let video_url = task.await.unwrap().expect("animation succeeds");

        let asset = engine.asset(id).await.unwrap();
        assert_eq!(asset.video_url.as_deref(), Some(video_url.as_str()));
        assert!(!asset.is_animating);
    }

    #[tokio::test]
    async fn failed_animation_clears_busy_flag_and_keeps_image() {
        let (engine, gateway) = studio();
        let id = completed_asset(&engine, &gateway).await;
        let before = engine.asset(id).await.unwrap();

        gateway.push_video(Err("quota exhausted"));
        assert!(engine.animate(id, None).await.is_err());

        let after = engine.asset(id).await.unwrap();
        assert!(!after.is_animating);
        assert!(after.video_url.is_none());
        assert_eq!(after.image_url, before.image_url);
        assert!(after.error.as_deref().unwrap().contains("quota exhausted"));
    }

    #[tokio::test]
    async fn background_removal_is_refused_while_a_video_is_paired() {
        let (engine, gateway) = studio();
        let id = completed_asset(&engine, &gateway).await;

        gateway.push_video(Ok("https://example.com/clip.mp4".to_string()));
        engine.animate(id, None).await.unwrap();

        let result = engine.remove_background(id).await;
        assert!(matches!(result, Err(StudioError::Precondition(_))));
        assert!(engine.asset(id).await.unwrap().video_url.is_some());
    }

    #[tokio::test]
    async fn stale_brief_submission_is_discarded() {
        let (engine, gateway) = studio();
        let release_a = gateway.push_ideas_gated(Ok(batch(&["Old Hero", "Old Card"])));
        gateway.push_ideas(Ok(batch(&["New Hero"])));

        let submission_a = tokio::spawn({
            let engine = engine.clone();
            async move {
                engine
                    .submit_brief(GenerateInput::Text {
                        value: "first brief".to_string(),
                    })
                    .await
            }
        });
        settle().await;

        engine
            .submit_brief(GenerateInput::Text {
                value: "second brief".to_string(),
            })
            .await
            .expect("second brief succeeds");

        release_a.send(()).unwrap();
        submission_a.await.unwrap().expect("superseded brief is not an error");

        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.ideas.len(), 1);
        assert_eq!(snapshot.ideas[0].section, "New Hero");
        assert!(!snapshot.is_generating_ideas);
    }

    #[tokio::test]
    async fn load_more_appends_without_touching_existing_assets() {
        let (engine, gateway) = studio();
        let id = completed_asset(&engine, &gateway).await;

        gateway.push_ideas(Ok(batch(&["Pricing Table", "FAQ Banner"])));
        assert!(engine.load_more().await.expect("load more succeeds"));

        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.ideas.len(), 3);
        assert_eq!(snapshot.ideas[0].section, "Hero Banner");
        assert_eq!(snapshot.ideas[2].section, "FAQ Banner");
        assert_eq!(
            engine.asset(id).await.unwrap().status,
            AssetStatus::Completed
        );
    }

    #[tokio::test]
    async fn load_more_failure_leaves_ideas_untouched() {
        let (engine, gateway) = studio();
        completed_asset(&engine, &gateway).await;

        gateway.push_ideas(Err("rate limited"));
        assert!(engine.load_more().await.is_err());

        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.ideas.len(), 1);
        assert!(snapshot.last_error.as_deref().unwrap().contains("rate limited"));
    }

    #[tokio::test]
    async fn load_more_without_a_brief_is_a_noop() {
        let (engine, _gateway) = studio();
        assert!(!engine.load_more().await.expect("noop"));
        assert!(engine.snapshot().await.ideas.is_empty());
    }

    #[tokio::test]
    async fn bulk_removal_partial_failure_keeps_successes() {
        let (engine, gateway) = studio();
        gateway.push_ideas(Ok(batch(&["First", "Second", "Third"])));
        engine
            .submit_brief(GenerateInput::Text {
                value: "brief".to_string(),
            })
            .await
            .unwrap();
        let ids: Vec<Uuid> = engine.snapshot().await.ideas.iter().map(|i| i.id).collect();

        for (index, id) in ids.iter().enumerate() {
            gateway.push_image(Ok(payload(&format!("base-{}", index))));
            engine.generate(*id).await.unwrap();
            engine.toggle_bookmark(*id).await;
        }

        gateway.script_edit_for("bytes-base-0", Ok(payload("stripped-0")));
        gateway.script_edit_for("bytes-base-1", Err("edit failed"));
        gateway.script_edit_for("bytes-base-2", Ok(payload("stripped-2")));

        let outcome = engine.bulk_remove_background().await.expect("bulk runs");
        assert_eq!(outcome, BulkOutcome { processed: 2, failed: 1 });

        let first = engine.asset(ids[0]).await.unwrap();
        let second = engine.asset(ids[1]).await.unwrap();
        let third = engine.asset(ids[2]).await.unwrap();
        assert!(first.image_url.contains("stripped-0"));
        assert!(second.image_url.contains("base-1"), "failed asset keeps its image");
        assert!(second.error.is_some());
        assert!(third.image_url.contains("stripped-2"));

        let snapshot = engine.snapshot().await;
        assert!(!snapshot.is_bulk_processing);
        assert_eq!(snapshot.last_error.as_deref(), Some(BULK_FAILURE_NOTICE));
    }

    #[tokio::test]
    async fn bulk_removal_skips_video_assets_and_unbookmarked_ones() {
        let (engine, gateway) = studio();
        gateway.push_ideas(Ok(batch(&["First", "Second"])));
        engine
            .submit_brief(GenerateInput::Text {
                value: "brief".to_string(),
            })
            .await
            .unwrap();
        let ids: Vec<Uuid> = engine.snapshot().await.ideas.iter().map(|i| i.id).collect();

        for (index, id) in ids.iter().enumerate() {
            gateway.push_image(Ok(payload(&format!("base-{}", index))));
            engine.generate(*id).await.unwrap();
        }
        // Only the first is bookmarked, and it carries a video.
        engine.toggle_bookmark(ids[0]).await;
        gateway.push_video(Ok("https://example.com/clip.mp4".to_string()));
        engine.animate(ids[0], None).await.unwrap();

        let outcome = engine.bulk_remove_background().await.expect("bulk runs");
        assert_eq!(outcome, BulkOutcome { processed: 0, failed: 0 });
        assert_eq!(gateway.edit_requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn brief_failure_clears_ideas_and_sets_banner() {
        let (engine, gateway) = studio();
        gateway.push_ideas(Err("backend down"));

        assert!(
            engine
                .submit_brief(GenerateInput::Text {
                    value: "brief".to_string(),
                })
                .await
                .is_err()
        );

        let snapshot = engine.snapshot().await;
        assert!(snapshot.ideas.is_empty(), "no partial state on failure");
        assert!(snapshot.last_error.as_deref().unwrap().contains("backend down"));

        engine.dismiss_error().await;
        assert!(engine.snapshot().await.last_error.is_none());
    }

    #[tokio::test]
    async fn new_brief_clears_assets_and_analysis_together() {
        let (engine, gateway) = studio();
        let id = completed_asset(&engine, &gateway).await;

        gateway.push_ideas(Ok(analyzed_batch(&["Fresh Hero"], 55)));
        engine
            .submit_brief(GenerateInput::Text {
                value: "another brief".to_string(),
            })
            .await
            .unwrap();

        assert!(engine.asset(id).await.is_none());
        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.ideas.len(), 1);
        assert_eq!(snapshot.analysis.unwrap().score, 55);
        assert!(snapshot.assets.is_empty());
    }

    #[tokio::test]
    async fn bookmarked_assets_follow_idea_order() {
        let (engine, gateway) = studio();
        gateway.push_ideas(Ok(batch(&["First", "Second", "Third"])));
        engine
            .submit_brief(GenerateInput::Text {
                value: "brief".to_string(),
            })
            .await
            .unwrap();
        let ids: Vec<Uuid> = engine.snapshot().await.ideas.iter().map(|i| i.id).collect();

        // Generate and bookmark out of order.
        for id in [ids[2], ids[0]] {
            gateway.push_image(Ok(payload("img")));
            engine.generate(id).await.unwrap();
            engine.toggle_bookmark(id).await;
        }

        let bookmarked = engine.bookmarked_assets().await;
        assert_eq!(bookmarked.len(), 2);
        assert_eq!(bookmarked[0].idea.section, "First");
        assert_eq!(bookmarked[1].idea.section, "Third");
    }
}
