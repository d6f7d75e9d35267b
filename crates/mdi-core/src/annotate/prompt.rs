//! Prompt construction for annotation and repair.

use super::rows::DocumentRow;
use super::schema::{annotation_schema, schema_hint};

/// System message sent with every request.
pub const SYSTEM_PROMPT: &str = "Ты аккуратный разметчик новостей о денежно-кредитной политике. \
Отвечай одним JSON-объектом по заданной схеме. Без Markdown, без комментариев, без лишних полей.";

const CODEBOOK: &str = "\
Задача: оценить позицию текста по отношению к ужесточению денежно-кредитной политики Банка России.

stance, ровно одно значение:
- hawkish: упор на инфляционные риски, необходимость высокой или более высокой ставки, жёсткий сигнал;
- dovish: упор на поддержку экономики, ожидание или одобрение снижения ставки, мягкий сигнал;
- neutral: пересказ фактов без заметного уклона;
- mixed: есть и жёсткие, и мягкие сигналы, ни один не преобладает;
- irrelevant: текст не о ключевой ставке и не о решениях ЦБ по ставке.

strength, целое от 0 до 3: 0 нет уклона, 1 слабый, 2 заметный, 3 сильный.

mentions_key_rate: true, если текст прямо говорит о ключевой ставке или решении по ней, иначе false.

reasons: от 1 до 5 коротких формулировок по-русски, почему выбран такой stance.

evidence: от 1 до 3 дословных фрагментов из текста, каждый не длиннее 160 символов. Ничего не придумывай.

notes: необязательный комментарий о спорных местах.";

/// First-pass prompt for a document.
pub fn build_prompt(doc: &DocumentRow) -> String {
    let payload = serde_json::json!({
        "source_type": doc.source_type,
        "source_name": doc.source_name,
        "title": doc.title,
        "lead": doc.lead,
        "text": doc.text_focus,
    });

    format!(
        "{CODEBOOK}\n\n\
         Формат ответа (структура, а не значения):\n{}\n\n\
         Документ (JSON с полями source_type, source_name, title, lead, text):\n{}",
        schema_hint(),
        payload
    )
}

/// Corrective prompt after a response failed to parse or validate.
pub fn build_repair_prompt(error: &str, previous_raw: &str) -> String {
    format!(
        "Предыдущий ответ не прошёл проверку.\n\
         Ошибка:\n{error}\n\n\
         Предыдущий ответ:\n{previous_raw}\n\n\
         Верни только исправленный JSON-объект, строго соответствующий схеме:\n{}",
        annotation_schema()
    )
}
