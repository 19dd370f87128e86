//! HTML login and consent page for the authorization endpoint.

use super::provider::ValidatedAuthorization;
use super::pkce;

/// Render the login form for a validated authorization request.
///
/// All interpolated values are HTML-escaped to prevent XSS.
#[must_use]
pub fn render_login_page(
    authorization: &ValidatedAuthorization,
    error_message: Option<&str>,
) -> String {
    let error_html = error_message
        .map(|msg| {
            format!(
                r#"<div style="background:#fee;border:1px solid #c00;color:#c00;padding:10px;border-radius:4px;margin-bottom:16px">{}</div>"#,
                html_escape(msg)
            )
        })
        .unwrap_or_default();

    let scope_items: String = authorization
        .scopes
        .iter()
        .map(|scope| {
            format!(
                "<li><code>{}</code> {}</li>\n",
                html_escape(scope.as_str()),
                html_escape(scope.description())
            )
        })
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<title>Authorize - Picard</title>
<style>
body {{ font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif; background: #f5f5f5; margin: 0; display: flex; justify-content: center; align-items: center; min-height: 100vh; }}
.card {{ background: #fff; border-radius: 8px; box-shadow: 0 2px 8px rgba(0,0,0,0.1); padding: 32px; max-width: 400px; width: 100%; }}
h1 {{ font-size: 20px; margin: 0 0 8px; color: #333; }}
.subtitle {{ color: #666; font-size: 14px; margin: 0 0 16px; }}
ul {{ font-size: 14px; color: #333; padding-left: 20px; margin: 0 0 20px; }}
label {{ display: block; font-size: 14px; font-weight: 500; margin: 12px 0 6px; color: #333; }}
input[type="text"], input[type="password"] {{ width: 100%; padding: 10px; border: 1px solid #ddd; border-radius: 4px; font-size: 14px; box-sizing: border-box; }}
.actions {{ display: flex; gap: 8px; margin-top: 16px; }}
button {{ flex: 1; padding: 10px; border: none; border-radius: 4px; font-size: 14px; font-weight: 500; cursor: pointer; }}
button.approve {{ background: #4a90d9; color: #fff; }}
button.deny {{ background: #eee; color: #333; }}
</style>
</head>
<body>
<div class="card">
<h1>Picard</h1>
<p class="subtitle"><strong>{client_name}</strong> is requesting access to:</p>
<ul>
{scope_items}</ul>
{error_html}
<form method="POST" action="/authorize">
<input type="hidden" name="response_type" value="code">
<input type="hidden" name="client_id" value="{client_id}">
<input type="hidden" name="redirect_uri" value="{redirect_uri}">
<input type="hidden" name="scope" value="{scope}">
<input type="hidden" name="state" value="{state}">
<input type="hidden" name="code_challenge" value="{code_challenge}">
<input type="hidden" name="code_challenge_method" value="{method}">
<label for="username">Username</label>
<input type="text" id="username" name="username" autocomplete="username" required autofocus>
<label for="password">Password</label>
<input type="password" id="password" name="password" autocomplete="current-password" required>
<div class="actions">
<button type="submit" class="deny" name="action" value="deny" formnovalidate>Deny</button>
<button type="submit" class="approve" name="action" value="approve">Approve</button>
</div>
</form>
</div>
</body>
</html>"#,
        client_name = html_escape(&authorization.client.client_name),
        scope_items = scope_items,
        error_html = error_html,
        client_id = authorization.client.client_id,
        redirect_uri = html_escape(&authorization.redirect_uri),
        scope = html_escape(&authorization.scopes.to_string()),
        state = html_escape(authorization.state.as_deref().unwrap_or_default()),
        code_challenge = html_escape(&authorization.code_challenge),
        method = pkce::METHOD_S256,
    )
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
