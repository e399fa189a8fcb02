//! Server-rendered contact table behind HTTP Basic auth, for admins without
//! the JS panel. Also serves the CSV export.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    Form,
};
use serde::Deserialize;
use std::fmt::Write as _;
use std::sync::Arc;

use super::{contacts::PageQuery, parse_id, AppState};
use crate::csv::contacts_csv;
use crate::error::ApiError;
use crate::models::Contact;
use crate::storage::{Page, PageRequest};

pub const ROWS_PER_PAGE: usize = 25;
const NOTE_PREVIEW_CHARS: usize = 240;

const STYLE: &str = "\
body{margin:0;font-family:system-ui,sans-serif;background:#0b0c0e;color:#e8eef2}\
.wrap{max-width:1200px;margin:0 auto;padding:22px}\
.muted{color:#aab3ba;font-size:12px;margin-top:4px}\
.nav{display:flex;justify-content:space-between;flex-wrap:wrap;gap:12px;margin:12px 0}\
.nav a{color:#fff;font-weight:700;margin-right:10px;text-decoration:none}\
table{width:100%;border-collapse:collapse}\
th,td{text-align:left;padding:10px;border-top:1px solid #222;vertical-align:top}\
th{font-size:12px;text-transform:uppercase;color:#aab3ba}\
.note{max-width:320px}\
button{background:#1c1f24;border:1px solid #333;color:#fff;border-radius:999px;padding:6px 10px;cursor:pointer}";

#[derive(Deserialize)]
pub struct DeleteForm {
    pub id: Option<String>,
}

pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            c => out.push(c),
        }
    }
    out
}

fn note_preview(note: Option<&str>) -> String {
    let note = note.unwrap_or_default();
    let mut preview: String = note.chars().take(NOTE_PREVIEW_CHARS).collect();
    if note.chars().count() > NOTE_PREVIEW_CHARS {
        preview.push('…');
    }
    escape_html(&preview)
}

fn contact_row(out: &mut String, c: &Contact) {
    let _ = write!(
        out,
        "<tr><td>{id}</td><td>{created}</td>\
         <td><strong>{nome}</strong><div class=\"muted\">{azienda}</div></td>\
         <td><a href=\"tel:{tel}\">{tel}</a></td>\
         <td><a href=\"mailto:{email}\">{email}</a></td>\
         <td>{indirizzo}</td><td class=\"note\">{note}</td>\
         <td><form method=\"POST\" action=\"/admin/delete\" \
         onsubmit=\"return confirm('Cancellare questo contatto?');\">\
         <input type=\"hidden\" name=\"id\" value=\"{id}\" />\
         <button type=\"submit\">Elimina</button></form></td></tr>",
        id = c.id,
        created = escape_html(&c.created_at),
        nome = escape_html(&c.nome),
        azienda = escape_html(c.azienda.as_deref().unwrap_or_default()),
        tel = escape_html(&c.telefono),
        email = escape_html(&c.email),
        indirizzo = escape_html(c.indirizzo.as_deref().unwrap_or_default()),
        note = note_preview(c.note.as_deref()),
    );
}

fn nav(page: usize, pages: usize, total: usize) -> String {
    format!(
        "<div class=\"nav\"><div>Totale: <strong>{total}</strong> · Pagina <strong>{page}</strong> di <strong>{pages}</strong></div>\
         <div><a href=\"/admin?page=1\">Prima</a><a href=\"/admin?page={prev}\">Indietro</a>\
         <a href=\"/admin?page={next}\">Avanti</a><a href=\"/admin?page={pages}\">Ultima</a>\
         <a href=\"/admin/export.csv\">Esporta CSV</a></div></div>",
        prev = page.saturating_sub(1).max(1),
        next = (page + 1).min(pages),
    )
}

pub fn render_contacts(page: &Page<Contact>) -> String {
    let pages = page.total.div_ceil(page.limit).max(1);
    let nav = nav(page.page, pages, page.total);

    let mut rows = String::new();
    for contact in &page.rows {
        contact_row(&mut rows, contact);
    }
    if rows.is_empty() {
        rows.push_str("<tr><td colspan=\"8\" class=\"muted\">Nessun contatto presente.</td></tr>");
    }

    format!(
        "<!doctype html><html lang=\"it\"><head><meta charset=\"utf-8\" />\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\" />\
         <title>Admin | Contatti</title><style>{STYLE}</style></head>\
         <body><div class=\"wrap\"><h1>Admin - Contatti</h1>{nav}\
         <table><thead><tr><th>ID</th><th>Data</th><th>Nome</th><th>Telefono</th>\
         <th>Email</th><th>Indirizzo</th><th>Note</th><th>Azioni</th></tr></thead>\
         <tbody>{rows}</tbody></table>{nav}</div></body></html>"
    )
}

pub async fn contacts_page(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Result<Html<String>, ApiError> {
    let request = PageRequest {
        limit: ROWS_PER_PAGE,
        ..query.request()
    };
    let page = state.stores.contacts.page(request).await?;
    Ok(Html(render_contacts(&page)))
}

pub async fn delete_contact(
    State(state): State<Arc<AppState>>,
    Form(form): Form<DeleteForm>,
) -> Result<Response, ApiError> {
    let Ok(id) = parse_id(form.id.as_deref().unwrap_or_default()) else {
        return Ok((StatusCode::BAD_REQUEST, "Bad request").into_response());
    };
    let deleted = state.stores.contacts.delete_by_id(id).await?;
    tracing::info!(id, deleted, "contact deleted from admin page");
    Ok(Redirect::to("/admin").into_response())
}

pub async fn export_csv(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let contacts = state.stores.contacts.list().await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"contatti.csv\"",
            ),
        ],
        contacts_csv(&contacts),
    )
        .into_response())
}
