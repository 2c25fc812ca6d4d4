/// Report management
use super::{ContentReport, ContentStatus, ContentType, ReportStatus, Resolution};
use crate::{
    audit::{AdminAction, AuditLogger},
    error::{ClubError, ClubResult},
    gateway::{GatewayExt, Order, RpcGateway, TableQuery},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

const MAX_REASON_LEN: usize = 500;
const MAX_DESCRIPTION_LEN: usize = 2000;
const DEFAULT_LIST_LIMIT: u32 = 200;

/// Server answer to a combined resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionSummary {
    pub resolved: u64,
    #[serde(default)]
    pub content_updated: u64,
}

/// Result of a bulk status update through the table path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub updated: Vec<Uuid>,
    /// Requested ids the server left untouched (already reviewed or unknown)
    pub skipped: Vec<Uuid>,
}

/// Report manager
#[derive(Clone)]
pub struct ReportManager {
    gateway: Arc<dyn RpcGateway>,
    audit: Arc<AuditLogger>,
}

impl ReportManager {
    pub fn new(gateway: Arc<dyn RpcGateway>, audit: Arc<AuditLogger>) -> Self {
        Self { gateway, audit }
    }

    /// File a report; it starts out `pending`
    pub async fn report(
        &self,
        content_id: Uuid,
        content_type: ContentType,
        reason: &str,
        description: Option<&str>,
        reporter_id: Uuid,
    ) -> ClubResult<ContentReport> {
        let reason = reason.trim();
        if reason.is_empty() || reason.chars().count() > MAX_REASON_LEN {
            return Err(ClubError::Validation(format!(
                "Report reason must be 1-{} characters",
                MAX_REASON_LEN
            )));
        }

        let description = description.map(str::trim).filter(|d| !d.is_empty());
        if description.is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN) {
            return Err(ClubError::Validation(format!(
                "Report description must be at most {} characters",
                MAX_DESCRIPTION_LEN
            )));
        }

        let report: ContentReport = self
            .gateway
            .rpc_as(
                "report_content",
                json!({
                    "p_content_id": content_id,
                    "p_content_type": content_type.as_str(),
                    "p_reason": reason,
                    "p_description": description,
                    "p_reporter_id": reporter_id,
                }),
            )
            .await?;

        tracing::info!(
            "Report {} filed against {} {}",
            report.id,
            content_type.as_str(),
            content_id
        );
        Ok(report)
    }

    pub async fn get(&self, report_id: Uuid) -> ClubResult<Option<ContentReport>> {
        let query = TableQuery::from("content_reports")
            .eq("id", report_id.to_string())
            .limit(1);
        let mut rows: Vec<ContentReport> = self.gateway.select_as(&query).await?;
        Ok(rows.pop())
    }

    /// List reports, newest first
    pub async fn list(
        &self,
        status: Option<ReportStatus>,
        limit: Option<u32>,
    ) -> ClubResult<Vec<ContentReport>> {
        let mut query = TableQuery::from("content_reports")
            .order_by("created_at", Order::Desc)
            .limit(limit.unwrap_or(DEFAULT_LIST_LIMIT));
        if let Some(status) = status {
            query = query.eq("status", status.as_str());
        }

        self.gateway.select_as(&query).await
    }

    /// Resolve reports and optionally act on the reported content, as one
    /// server-side unit. Either every report is resolved or none is.
    pub async fn resolve_reports(
        &self,
        report_ids: &[Uuid],
        resolution: Resolution,
        content_action: Option<ContentStatus>,
        notes: Option<&str>,
    ) -> ClubResult<ResolutionSummary> {
        if report_ids.is_empty() {
            return Err(ClubError::Validation("No reports selected".to_string()));
        }
        if let Some(action) = content_action {
            if !action.is_moderation_target() {
                return Err(ClubError::Validation(format!(
                    "Content cannot be moved to {}",
                    action.as_str()
                )));
            }
        }

        let summary: ResolutionSummary = self
            .gateway
            .rpc_as(
                "resolve_content_reports",
                json!({
                    "p_report_ids": report_ids,
                    "p_resolution": resolution.as_str(),
                    "p_content_action": content_action.map(|a| a.as_str()),
                    "p_notes": notes,
                }),
            )
            .await?;

        tracing::info!(
            "Resolved {} report(s) as {}",
            summary.resolved,
            resolution.as_str()
        );

        self.audit.record(AdminAction::new(
            "reports_resolved",
            "content_report",
            None,
            json!({
                "report_ids": report_ids,
                "resolution": resolution.as_str(),
                "content_action": content_action.map(|a| a.as_str()),
                "count": summary.resolved,
            }),
        ));

        Ok(summary)
    }

    /// Approve or reject many reports with one `IN (...)` update.
    /// Already-reviewed reports are left alone by the server, which also
    /// stamps the reviewer and review time from the authenticated caller.
    pub async fn bulk_update_status(
        &self,
        report_ids: &[Uuid],
        resolution: Resolution,
    ) -> ClubResult<BulkOutcome> {
        if report_ids.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let query = TableQuery::from("content_reports")
            .in_list("id", report_ids.iter().map(|id| id.to_string()));
        let patch = json!({ "status": resolution.as_str() });

        let rows: Vec<ContentReport> = self.gateway.update_as(&query, patch).await?;
        let updated: BTreeSet<Uuid> = rows.iter().map(|r| r.id).collect();
        let outcome = BulkOutcome {
            updated: report_ids.iter().copied().filter(|id| updated.contains(id)).collect(),
            skipped: report_ids.iter().copied().filter(|id| !updated.contains(id)).collect(),
        };

        tracing::info!(
            "Bulk {}: {} updated, {} skipped",
            resolution.as_str(),
            outcome.updated.len(),
            outcome.skipped.len()
        );

        self.audit.record(AdminAction::new(
            &format!("reports_bulk_{}", resolution.as_str()),
            "content_report",
            None,
            json!({
                "count": outcome.updated.len(),
                "report_ids": outcome.updated,
            }),
        ));

        Ok(outcome)
    }
}

/// Admin moderation view over the report list.
///
/// Rows are only ever replaced by a fresh server read; after any resolution
/// attempt the queue reloads instead of patching local copies.
pub struct ModerationQueue {
    manager: ReportManager,
    filter: Option<ReportStatus>,
    reports: Vec<ContentReport>,
    selected: BTreeSet<Uuid>,
}

impl ModerationQueue {
    pub fn new(manager: ReportManager, filter: Option<ReportStatus>) -> Self {
        Self {
            manager,
            filter,
            reports: Vec::new(),
            selected: BTreeSet::new(),
        }
    }

    pub async fn reload(&mut self) -> ClubResult<()> {
        let reports = self.manager.list(self.filter, None).await?;
        self.selected.retain(|id| {
            reports
                .iter()
                .any(|r| r.id == *id && r.status == ReportStatus::Pending)
        });
        self.reports = reports;
        Ok(())
    }

    pub fn set_filter(&mut self, filter: Option<ReportStatus>) {
        self.filter = filter;
    }

    pub fn reports(&self) -> &[ContentReport] {
        &self.reports
    }

    pub fn get(&self, report_id: Uuid) -> Option<&ContentReport> {
        self.reports.iter().find(|r| r.id == report_id)
    }

    /// Toggle selection of a pending report
    pub fn toggle(&mut self, report_id: Uuid) {
        if !self.selected.remove(&report_id)
            && self
                .get(report_id)
                .is_some_and(|r| r.status == ReportStatus::Pending)
        {
            self.selected.insert(report_id);
        }
    }

    pub fn select_all_pending(&mut self) {
        self.selected = self
            .reports
            .iter()
            .filter(|r| r.status == ReportStatus::Pending)
            .map(|r| r.id)
            .collect();
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }

    pub fn selected(&self) -> Vec<Uuid> {
        self.selected.iter().copied().collect()
    }

    pub async fn approve_selected(&mut self) -> ClubResult<BulkOutcome> {
        self.bulk(Resolution::Approved).await
    }

    pub async fn reject_selected(&mut self) -> ClubResult<BulkOutcome> {
        self.bulk(Resolution::Rejected).await
    }

    /// Combined resolution of specific reports, followed by a reload
    pub async fn resolve(
        &mut self,
        report_ids: &[Uuid],
        resolution: Resolution,
        content_action: Option<ContentStatus>,
        notes: Option<&str>,
    ) -> ClubResult<ResolutionSummary> {
        let result = self
            .manager
            .resolve_reports(report_ids, resolution, content_action, notes)
            .await;
        self.refresh().await;
        result
    }

    async fn bulk(&mut self, resolution: Resolution) -> ClubResult<BulkOutcome> {
        let ids = self.selected();
        if ids.is_empty() {
            return Err(ClubError::Validation("No reports selected".to_string()));
        }

        let result = self
            .manager
            .bulk_update_status(&ids, resolution)
            .await;
        self.refresh().await;
        result
    }

    async fn refresh(&mut self) {
        if let Err(e) = self.reload().await {
            // Stale rows must not stay on screen as if current
            tracing::warn!("Failed to reload reports: {}", e);
            self.reports.clear();
            self.selected.clear();
        }
    }
}
