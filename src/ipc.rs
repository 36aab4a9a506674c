use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use ui::{Request, RequestError, Response};

use crate::error::Result;
use crate::state::Background;

/// Routes one raw request to its handler and wraps the outcome in the
/// uniform reply envelope.
pub async fn dispatch(background: &Background, message: &Value) -> Response {
    let request = match Request::parse(message) {
        Ok(request) => request,
        Err(RequestError::UnknownAction) => {
            debug!(event = "unknown_action", message = %message);
            return Response::failure(RequestError::UnknownAction.to_string());
        }
        Err(err) => {
            warn!(event = "request_rejected", error = %err);
            return Response::failure(err.to_string());
        }
    };

    match handle(background, &request).await {
        Ok(response) => response,
        Err(err) => {
            warn!(event = "request_failed", action = request.action(), error = %err);
            Response::failure(err.to_string())
        }
    }
}

async fn handle(background: &Background, request: &Request) -> Result<Response> {
    let query = background.query();
    match request {
        Request::GetTabStats => data(&query.tab_stats().await?),
        Request::GetDownloadStats => data(&query.download_stats().await?),
        Request::GetSystemStats => data(&query.system_stats().await),
        Request::CloseTab { tab_id } => {
            background.host().close_tab(*tab_id).await?;
            background.stats().tabs.borrow_mut().delete(*tab_id);
            Ok(Response::done())
        }
        Request::FocusTab { tab_id } => {
            background.host().focus_tab(*tab_id).await?;
            Ok(Response::done())
        }
        Request::PauseDownload { download_id } => {
            background.host().pause_download(*download_id).await?;
            Ok(Response::done())
        }
        Request::ResumeDownload { download_id } => {
            background.host().resume_download(*download_id).await?;
            Ok(Response::done())
        }
        Request::CancelDownload { download_id } => {
            background.host().cancel_download(*download_id).await?;
            Ok(Response::done())
        }
    }
}

fn data<T: Serialize>(payload: &T) -> Result<Response> {
    Ok(Response::ok(serde_json::to_value(payload)?))
}
