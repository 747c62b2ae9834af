//! Custom question answers attached to carts and, after checkout, orders.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::models::product::Product;
use crate::models::question::{Answer, Question};
use crate::utils::error::{AppError, AppResult};

/// Event questions filtered through [`Question::is_applicable`] against their
/// explicit product links.
async fn applicable_questions(conn: &mut PgConnection, product: &Product) -> AppResult<Vec<Question>> {
    let questions = sqlx::query_as::<_, Question>(
        "SELECT * FROM questions WHERE event_id = $1 ORDER BY position, id",
    )
    .bind(product.event_id)
    .fetch_all(&mut *conn)
    .await?;

    let question_ids: Vec<Uuid> = questions.iter().map(|q| q.id).collect();
    let links = sqlx::query_as::<_, (Uuid, Uuid)>(
        "SELECT question_id, product_id FROM question_products WHERE question_id = ANY($1)",
    )
    .bind(&question_ids)
    .fetch_all(&mut *conn)
    .await?;

    Ok(questions
        .into_iter()
        .filter(|q| {
            let product_ids: Vec<Uuid> = links
                .iter()
                .filter(|(question_id, _)| *question_id == q.id)
                .map(|(_, product_id)| *product_id)
                .collect();
            q.is_applicable(product, &product_ids)
        })
        .collect())
}

/// Required questions for the product with no stored answer on the cart.
pub async fn count_unanswered_required(conn: &mut PgConnection, cart_id: Uuid, product: &Product) -> AppResult<i64> {
    let answered = sqlx::query_scalar::<_, Uuid>("SELECT question_id FROM answers WHERE cart_id = $1")
        .bind(cart_id)
        .fetch_all(&mut *conn)
        .await?;
    let missing = applicable_questions(conn, product)
        .await?
        .iter()
        .filter(|q| q.required && !answered.contains(&q.id))
        .count();
    Ok(missing as i64)
}

/// Validates and upserts an answer. An empty optional answer removes any
/// previous one.
pub async fn save_answer(
    conn: &mut PgConnection,
    cart_id: Uuid,
    product: &Product,
    question_id: Uuid,
    raw: Option<&str>,
) -> AppResult<Option<Answer>> {
    let question = applicable_questions(conn, product)
        .await?
        .into_iter()
        .find(|q| q.id == question_id)
        .ok_or_else(|| AppError::NotFound(format!("Question {}", question_id)))?;

    let Some(cleaned) = question.clean_answer(raw)? else {
        sqlx::query("DELETE FROM answers WHERE cart_id = $1 AND question_id = $2")
            .bind(cart_id)
            .bind(question_id)
            .execute(&mut *conn)
            .await?;
        return Ok(None);
    };

    let answer = sqlx::query_as::<_, Answer>(
        "INSERT INTO answers (id, question_id, cart_id, answer)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (cart_id, question_id) DO UPDATE SET answer = EXCLUDED.answer
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(question_id)
    .bind(cart_id)
    .bind(&cleaned)
    .fetch_one(&mut *conn)
    .await?;
    Ok(Some(answer))
}

/// Re-parents the cart's answers onto the order created from it.
pub async fn move_answers_to_order(conn: &mut PgConnection, cart_id: Uuid, order_id: Uuid) -> AppResult<u64> {
    let moved = sqlx::query("UPDATE answers SET cart_id = NULL, order_id = $2 WHERE cart_id = $1")
        .bind(cart_id)
        .bind(order_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(moved)
}
