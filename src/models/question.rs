use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

use super::product::Product;
use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "question_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Number,
    String,
    Text,
    Boolean,
    Date,
    Time,
    DateTime,
    PhoneNumber,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Question {
    pub id: Uuid,
    pub event_id: Uuid,
    pub question: String,
    pub help_text: Option<String>,
    pub kind: QuestionKind,
    pub required: bool,
    pub can_modify_later: bool,
    pub all_products: bool,
    pub position: i32,
    pub valid_number_min: Option<Decimal>,
    pub valid_number_max: Option<Decimal>,
    pub valid_date_min: Option<NaiveDate>,
    pub valid_date_max: Option<NaiveDate>,
    pub valid_string_length_max: Option<i32>,
}

/// Attached to exactly one of a cart (before checkout) or an order.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Answer {
    pub id: Uuid,
    pub question_id: Uuid,
    pub cart_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

fn invalid(msg: &str) -> AppError {
    AppError::InvalidAnswer(msg.to_string())
}

fn is_truthy(raw: &str) -> bool {
    matches!(raw, "true" | "True")
}

impl Question {
    /// `product_ids` is the question's explicit product set.
    pub fn is_applicable(&self, product: &Product, product_ids: &[Uuid]) -> bool {
        (self.all_products && product.event_id == self.event_id) || product_ids.contains(&product.id)
    }

    /// Normalises a raw answer for storage. `None` means "nothing to store".
    pub fn clean_answer(&self, raw: Option<&str>) -> AppResult<Option<String>> {
        let raw = raw.map(str::trim).filter(|s| !s.is_empty());

        if self.required {
            let missing = match raw {
                None => true,
                Some(value) => self.kind == QuestionKind::Boolean && !is_truthy(value),
            };
            if missing {
                return Err(invalid("An answer to this question is required to proceed."));
            }
        }

        let Some(raw) = raw else {
            return Ok(match self.kind {
                QuestionKind::Boolean => Some("false".to_string()),
                _ => None,
            });
        };

        let cleaned = match self.kind {
            QuestionKind::Boolean => is_truthy(raw).to_string(),
            QuestionKind::Number => {
                let value = Decimal::from_str(&raw.replace([',', ' '], ""))
                    .map_err(|_| invalid("Invalid number input."))?;
                if self.valid_number_min.is_some_and(|min| value < min) {
                    return Err(invalid("The number is too low."));
                }
                if self.valid_number_max.is_some_and(|max| value > max) {
                    return Err(invalid("The number is too high."));
                }
                value.normalize().to_string()
            }
            QuestionKind::Date => {
                let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map_err(|_| invalid("Invalid date input."))?;
                if self.valid_date_min.is_some_and(|min| date < min) {
                    return Err(invalid("Please choose a later date."));
                }
                if self.valid_date_max.is_some_and(|max| date > max) {
                    return Err(invalid("Please choose an earlier date."));
                }
                date.to_string()
            }
            QuestionKind::Time => NaiveTime::parse_from_str(raw, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
                .map_err(|_| invalid("Invalid time input."))?
                .format("%H:%M:%S")
                .to_string(),
            QuestionKind::DateTime => DateTime::parse_from_rfc3339(raw)
                .map_err(|_| invalid("Invalid date and time input."))?
                .with_timezone(&Utc)
                .to_rfc3339(),
            QuestionKind::PhoneNumber => {
                let digits = raw.strip_prefix('+').unwrap_or("");
                if !(8..=15).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
                    return Err(invalid("Phone number must be in E.164 format."));
                }
                raw.to_string()
            }
            QuestionKind::String | QuestionKind::Text => {
                if self.kind == QuestionKind::String && raw.contains('\n') {
                    return Err(invalid("Answer must be a single line."));
                }
                if let Some(max) = self.valid_string_length_max {
                    if raw.chars().count() > max.max(0) as usize {
                        return Err(invalid("The answer is too long."));
                    }
                }
                raw.to_string()
            }
        };
        Ok(Some(cleaned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::product::fixtures::{event, product};
    use rust_decimal_macros::dec;

    fn question(kind: QuestionKind, required: bool) -> Question {
        Question {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            question: "Attendee age".into(),
            help_text: None,
            kind,
            required,
            can_modify_later: false,
            all_products: false,
            position: 0,
            valid_number_min: None,
            valid_number_max: None,
            valid_date_min: None,
            valid_date_max: None,
            valid_string_length_max: None,
        }
    }

    #[test]
    fn required_questions_need_an_answer() {
        let q = question(QuestionKind::String, true);
        assert!(q.clean_answer(None).is_err());
        assert!(q.clean_answer(Some("   ")).is_err());
        assert_eq!(q.clean_answer(Some(" Ada ")).unwrap().as_deref(), Some("Ada"));

        let consent = question(QuestionKind::Boolean, true);
        assert!(consent.clean_answer(Some("False")).is_err());
        assert_eq!(consent.clean_answer(Some("True")).unwrap().as_deref(), Some("true"));
    }

    #[test]
    fn number_bounds() {
        let mut q = question(QuestionKind::Number, false);
        q.valid_number_min = Some(dec!(18));
        q.valid_number_max = Some(dec!(99));
        assert!(q.clean_answer(Some("17")).is_err());
        assert!(q.clean_answer(Some("abc")).is_err());
        assert_eq!(q.clean_answer(Some("21.0")).unwrap().as_deref(), Some("21"));
        assert_eq!(q.clean_answer(None).unwrap(), None);
    }

    #[test]
    fn dates_times_and_phones() {
        let mut date = question(QuestionKind::Date, false);
        date.valid_date_min = NaiveDate::from_ymd_opt(2024, 1, 1);
        assert!(date.clean_answer(Some("2023-12-31")).is_err());
        assert_eq!(date.clean_answer(Some("2024-02-29")).unwrap().as_deref(), Some("2024-02-29"));

        let time = question(QuestionKind::Time, false);
        assert_eq!(time.clean_answer(Some("18:30")).unwrap().as_deref(), Some("18:30:00"));

        let phone = question(QuestionKind::PhoneNumber, false);
        assert!(phone.clean_answer(Some("12345")).is_err());
        assert!(phone.clean_answer(Some("+911234567890")).is_ok());
    }

    #[test]
    fn applicability() {
        let event = event();
        let product = product(&event, dec!(100));
        let mut q = question(QuestionKind::Text, false);
        q.event_id = event.id;
        assert!(!q.is_applicable(&product, &[]));
        assert!(q.is_applicable(&product, &[product.id]));
        q.all_products = true;
        assert!(q.is_applicable(&product, &[]));
    }
}
