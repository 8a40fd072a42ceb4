//! HTML upload forms for trying operations from a browser.

use crate::operations::Operation;

/// Example query for each operation's form.
fn sample_query(operation: Operation) -> &'static str {
    match operation {
        Operation::Resize => "width=300&height=200&type=png",
        Operation::Fit => "width=300&height=300",
        Operation::Enlarge => "width=1440&height=900&quality=95",
        Operation::Extract => "top=100&left=100&areawidth=300&areaheight=150",
        Operation::Crop => "width=562&height=562&quality=95",
        Operation::SmartCrop => "width=300&height=260&quality=95",
        Operation::Rotate => "rotate=180",
        Operation::Flip | Operation::Flop | Operation::Info => "",
        Operation::Thumbnail => "width=100",
        Operation::Zoom => "factor=2&areawidth=300&areaheight=300&top=80&left=80",
        Operation::Convert => "type=png",
        Operation::Watermark => "textwidth=100&text=Hello&font=sans%2012&opacity=0.5&color=255,200,50",
        Operation::WatermarkImage => "image=https://example.com/logo.png&top=10&left=10&opacity=0.5",
        Operation::Blur => "sigma=5",
        Operation::Pipeline => {
            "operations=%5B%7B%22operation%22%3A%22crop%22%2C%22params%22%3A%7B%22width%22%3A300%2C%22height%22%3A260%7D%7D%2C%7B%22operation%22%3A%22convert%22%2C%22params%22%3A%7B%22type%22%3A%22webp%22%7D%7D%5D"
        }
    }
}

fn html_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&#x27;"),
            _ => result.push(c),
        }
    }
    result
}

/// Render the form page. Form actions are mounted under `prefix`.
pub fn render_form(prefix: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let mut sections = String::new();

    for operation in Operation::ALL {
        let query = sample_query(operation);
        let action = if query.is_empty() {
            format!("{}{}", prefix, operation.route())
        } else {
            format!("{}{}?{}", prefix, operation.route(), query)
        };

        sections.push_str(&format!(
            r#"<h2>{name}</h2>
<form method="POST" action="{action}" enctype="multipart/form-data">
  <input type="file" name="file" />
  <input type="submit" value="Upload" />
</form>
"#,
            name = html_escape(operation.name()),
            action = html_escape(&action),
        ));
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>imagegate</title>
</head>
<body>
<h1>imagegate {version}</h1>
{sections}</body>
</html>
"#,
        version = env!("CARGO_PKG_VERSION"),
    )
}
