use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use giveback_types::api::MessageBody;

/// User-facing REST messages.
pub mod msg {
    pub const SERVER_ERROR: &str = "שגיאת שרת";
    pub const NOT_AUTHENTICATED: &str = "אין הרשאה, נדרשת התחברות";
    pub const ADMIN_ONLY: &str = "פעולה זו מותרת למנהלים בלבד";

    pub const USERNAME_REQUIRED: &str = "שם משתמש נדרש";
    pub const INVALID_EMAIL: &str = "אנא הכנס כתובת אימייל תקינה";
    pub const PASSWORD_TOO_SHORT: &str = "אנא הכנס סיסמה באורך 6 תווים לפחות";
    pub const PASSWORD_REQUIRED: &str = "סיסמה נדרשת";
    pub const EMAIL_TAKEN: &str = "כתובת המייל כבר קיימת במערכת";
    pub const USERNAME_TAKEN: &str = "שם המשתמש כבר קיים במערכת";
    pub const BAD_CREDENTIALS: &str = "אימייל או סיסמה שגויים";
    pub const USER_NOT_FOUND: &str = "משתמש לא נמצא";
    pub const USER_DELETED: &str = "המשתמש נמחק בהצלחה";
    pub const CANNOT_DELETE_SELF: &str = "מנהל אינו יכול למחוק את עצמו";

    pub const CARD_NOT_FOUND: &str = "הכרטיס לא נמצא";
    pub const CARD_UPDATE_FORBIDDEN: &str = "אין הרשאה לעדכן את הכרטיס";
    pub const CARD_DELETE_FORBIDDEN: &str = "אין הרשאה למחוק את הכרטיס";
    pub const CARD_DELETED: &str = "הכרטיס נמחק בהצלחה";
    pub const INVALID_CARD_TYPE: &str = "סוג כרטיס לא תקין";
    pub const COORDINATES_REQUIRED: &str = "יש לספק קווי אורך ורוחב";
    pub const INVALID_COORDINATES: &str = "קואורדינטות לא תקינות";
    pub const INVALID_DISTANCE: &str = "מרחק לא תקין";
    pub const IMAGES_ONLY: &str = "רק קבצי תמונה מותרים";
    pub const IMAGE_TOO_LARGE: &str = "גודל התמונה חורג מ-5MB";
    pub const INVALID_FORM: &str = "טופס לא תקין";

    pub const CHAT_NOT_FOUND: &str = "צ'אט לא נמצא";
    pub const CHAT_VIEW_FORBIDDEN: &str = "אין הרשאה לצפייה בצ'אט זה";
    pub const CHAT_SEND_FORBIDDEN: &str = "אין הרשאה לשליחת הודעה בצ'אט זה";
    pub const PARTICIPANT_REQUIRED: &str = "חסר מזהה משתתף";
    pub const CHAT_WITH_SELF: &str = "לא ניתן לפתוח צ'אט עם עצמך";
    pub const CHAT_ON_OWN_CARD: &str = "לא ניתן לפתוח צ'אט על כרטיס שלך";
    pub const CONTENT_REQUIRED: &str = "תוכן ההודעה נדרש";

    pub fn field_required(field: &str) -> String {
        format!("השדה {} נדרש", field)
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            Self::Internal(e) => {
                error!("Internal error: {:#}", e);
                msg::SERVER_ERROR.to_string()
            }
            other => other.to_string(),
        };

        (status, Json(MessageBody { message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(ApiError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::unauthorized("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::forbidden("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let response = ApiError::Internal(anyhow::anyhow!("disk on fire")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], msg::SERVER_ERROR);
    }

    #[tokio::test]
    async fn client_errors_render_their_message() {
        let response = ApiError::not_found(msg::CARD_NOT_FOUND).into_response();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], msg::CARD_NOT_FOUND);
    }
}
