//! Semicolon-separated export of the contact list (opens directly in Excel
//! with an Italian locale).

use crate::models::Contact;

pub const DELIMITER: char = ';';
pub const HEADER: [&str; 8] = [
    "id",
    "created_at",
    "nome",
    "azienda",
    "telefono",
    "email",
    "indirizzo",
    "note",
];

/// Quotes the value when it contains a quote, comma, semicolon or line
/// break; embedded quotes are doubled.
pub fn csv_value(value: &str) -> String {
    let needs_quote = value.contains(['"', ',', ';', '\n', '\r']);
    let escaped = value.replace('"', "\"\"");
    if needs_quote {
        format!("\"{escaped}\"")
    } else {
        escaped
    }
}

fn opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or_default()
}

pub fn contacts_csv(contacts: &[Contact]) -> String {
    let mut lines = Vec::with_capacity(contacts.len() + 1);
    lines.push(HEADER.join(";"));

    for c in contacts {
        let fields = [
            c.id.to_string(),
            csv_value(&c.created_at),
            csv_value(&c.nome),
            csv_value(opt(&c.azienda)),
            csv_value(&c.telefono),
            csv_value(&c.email),
            csv_value(opt(&c.indirizzo)),
            csv_value(opt(&c.note)),
        ];
        lines.push(fields.join(";"));
    }

    lines.join("\n")
}
