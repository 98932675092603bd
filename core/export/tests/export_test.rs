use memo_mirror_export::{format_export, ExportConfig, ExportFormat, UrlMode};
use memo_mirror_schemas::Memo;

fn sample_memos() -> Vec<Memo> {
    (1..=10)
        .map(|i| Memo {
            slug: format!("slug{:02}", i),
            content: format!("Memo {}\nwith a second line and \"quotes\"", i),
            created_at: format!("2024-04-{:02} 09:15:00", i),
            updated_at: format!("2024-04-{:02} 10:00:00", i + 1),
            tags: if i % 3 == 0 {
                vec!["reading".to_string(), "books".to_string()]
            } else {
                vec![]
            },
            url: if i % 4 == 0 {
                None
            } else {
                Some(format!("https://v.flomoapp.com/mine/?memo_id=slug{:02}", i))
            },
        })
        .collect()
}

#[test]
fn markdown_export_is_deterministic() {
    let memos = sample_memos();
    let config = ExportConfig {
        format: ExportFormat::Markdown,
        url_mode: UrlMode::Full,
        minimal: false,
        ..ExportConfig::default()
    };

    let first = format_export(&memos, &config).unwrap();
    let second = format_export(&memos, &config).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.matches("\n---\n").count(), 10);
}

#[test]
fn pretty_json_parses_back_to_the_same_memos() {
    let memos = sample_memos();
    let output = format_export(&memos, &ExportConfig::new(ExportFormat::Json)).unwrap();

    let parsed: Vec<Memo> = serde_json::from_str(&output).unwrap();
    assert_eq!(parsed, memos);

    let raw: Vec<serde_json::Value> = serde_json::from_str(&output).unwrap();
    let indexes: Vec<u64> = raw.iter().map(|v| v["index"].as_u64().unwrap()).collect();
    assert_eq!(indexes, (1..=10).collect::<Vec<_>>());
}

#[test]
fn json_dates_follow_the_configured_format() {
    let memos = sample_memos();
    let config = ExportConfig {
        format: ExportFormat::Json,
        date_format: Some("dd/MM/yyyy".to_string()),
        compact: true,
        ..ExportConfig::default()
    };

    let output = format_export(&memos[..1], &config).unwrap();
    let raw: Vec<serde_json::Value> = serde_json::from_str(&output).unwrap();
    assert_eq!(raw[0]["created_at"], "01/04/2024");
    assert_eq!(raw[0]["updated_at"], "02/04/2024");
}

#[test]
fn empty_slice_renders_headers_only() {
    let table = format_export(&[], &ExportConfig::new(ExportFormat::Table)).unwrap();
    assert_eq!(table.lines().count(), 2);

    let json = format_export(&[], &ExportConfig::new(ExportFormat::Json)).unwrap();
    assert_eq!(json, "[]");

    let markdown = format_export(&[], &ExportConfig::new(ExportFormat::Markdown)).unwrap();
    assert_eq!(markdown, "# Memos\n\n");
}
