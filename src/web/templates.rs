//! Embedded HTML templates for the web pages.
//!
//! All templates are `&str` constants rendered via minijinja. Names end in
//! `.html` so autoescaping is on.

/// Base layout template. All pages extend this.
pub const LAYOUT: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="csrf-token" content="{{ csrf_token }}">
    <title>{% block title %}{{ app_name }}{% endblock %}</title>
    <style>
        :root {
            --bg: #0f1117;
            --panel: #1a1d27;
            --border: #2e3245;
            --text: #e1e4ed;
            --muted: #8b8fa3;
            --accent: #6366f1;
            --danger: #ef4444;
            --radius: 8px;
        }
        *, *::before, *::after { box-sizing: border-box; margin: 0; padding: 0; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: var(--bg);
            color: var(--text);
            line-height: 1.6;
            min-height: 100vh;
        }
        a { color: var(--accent); text-decoration: none; }
        .navbar {
            background: var(--panel);
            border-bottom: 1px solid var(--border);
            padding: 0 1.5rem;
            height: 56px;
            display: flex;
            align-items: center;
            justify-content: space-between;
        }
        .navbar-brand { font-weight: 700; color: var(--text); }
        .nav-user { display: flex; align-items: center; gap: 0.75rem; font-size: 0.875rem; }
        .avatar { width: 28px; height: 28px; border-radius: 50%; }
        .container { max-width: 720px; margin: 0 auto; padding: 2rem 1.5rem; }
        .card {
            background: var(--panel);
            border: 1px solid var(--border);
            border-radius: var(--radius);
            padding: 1.5rem;
            margin-bottom: 1rem;
        }
        h1 { font-size: 1.5rem; margin-bottom: 1rem; }
        .muted { color: var(--muted); font-size: 0.875rem; }
        .alert {
            border: 1px solid var(--danger);
            color: var(--danger);
            border-radius: var(--radius);
            padding: 0.75rem 1rem;
            margin-bottom: 1rem;
        }
        .btn {
            display: inline-block;
            width: 100%;
            padding: 0.625rem 1rem;
            margin-top: 0.5rem;
            border: 1px solid var(--border);
            border-radius: var(--radius);
            background: var(--bg);
            color: var(--text);
            cursor: pointer;
            font-size: 0.9375rem;
        }
        .btn:hover { border-color: var(--accent); }
        .btn-link { width: auto; margin: 0; padding: 0.25rem 0.5rem; font-size: 0.8125rem; }
        table { width: 100%; border-collapse: collapse; font-size: 0.875rem; }
        th, td { text-align: left; padding: 0.5rem; border-bottom: 1px solid var(--border); }
        th { color: var(--muted); font-weight: 500; }
    </style>
</head>
<body>
    <nav class="navbar">
        <a class="navbar-brand" href="/">{{ app_name }}</a>
        <div class="nav-user">
        {% if user %}
            {% if user.avatar_url %}<img class="avatar" src="{{ user.avatar_url }}" alt="">{% endif %}
            <a href="/account">{{ user.display_name or "Account" }}</a>
            <form method="post" action="/auth/logout">
                <input type="hidden" name="csrf_token" value="{{ csrf_token }}">
                <button class="btn btn-link" type="submit">Sign out</button>
            </form>
        {% else %}
            <a href="/auth/login">Sign in</a>
        {% endif %}
        </div>
    </nav>
    <main class="container">
        {% block content %}{% endblock %}
    </main>
</body>
</html>
"#;

pub const HOME: &str = r#"{% extends "layout.html" %}
{% block content %}
<div class="card">
    <h1>{{ app_name }}</h1>
    {% if user %}
    <p>Signed in as {{ user.display_name }}. <a href="/account">View your account</a>.</p>
    {% else %}
    <p class="muted">Sign in with a social account to get started.</p>
    <a class="btn" href="/auth/login">Sign in</a>
    {% endif %}
</div>
{% endblock %}
"#;

pub const LOGIN: &str = r#"{% extends "layout.html" %}
{% block title %}Sign in | {{ app_name }}{% endblock %}
{% block content %}
<div class="card">
    <h1>Sign in</h1>
    {% if error %}<div class="alert" role="alert">{{ error }}</div>{% endif %}
    {% for provider in providers %}
    <form method="post" action="/auth/login/{{ provider.id }}">
        <input type="hidden" name="csrf_token" value="{{ csrf_token }}">
        <input type="hidden" name="next" value="{{ next }}">
        <button class="btn" type="submit">Continue with {{ provider.name }}</button>
    </form>
    {% else %}
    <p class="muted">No sign-in providers are configured.</p>
    {% endfor %}
</div>
{% endblock %}
"#;

pub const ACCOUNT: &str = r#"{% extends "layout.html" %}
{% block title %}Account | {{ app_name }}{% endblock %}
{% block content %}
<div class="card">
    <h1>Account</h1>
    <table>
        <tr><th>Name</th><td>{{ user.display_name }}</td></tr>
        <tr><th>Email</th><td>{{ user.email or "not shared" }}</td></tr>
        <tr><th>Member since</th><td>{{ member_since }}</td></tr>
    </table>
</div>
<div class="card">
    <h1>Linked accounts</h1>
    <table>
        <thead><tr><th>Provider</th><th>Account</th><th>Linked</th></tr></thead>
        <tbody>
        {% for identity in identities %}
            <tr>
                <td>{{ identity.provider }}</td>
                <td>{{ identity.handle or identity.email or identity.provider_user_id }}</td>
                <td>{{ identity.linked }}</td>
            </tr>
        {% endfor %}
        </tbody>
    </table>
</div>
{% endblock %}
"#;

pub const NOT_FOUND: &str = r#"{% extends "layout.html" %}
{% block title %}Not Found | {{ app_name }}{% endblock %}
{% block content %}
<div class="card">
    <h1>Page not found</h1>
    <p class="muted">The page you asked for does not exist. <a href="/">Go home</a>.</p>
</div>
{% endblock %}
"#;
