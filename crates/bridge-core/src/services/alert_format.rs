//! Chat rendering of trading alerts

use bridge_types::Alert;

/// Render an alert as a chat message body. Same alert, same text.
pub fn format_alert(alert: &Alert) -> String {
    let mut lines = vec![
        format!("🚀 *SIGNAL ALERT: {}*", alert.ticker),
        String::new(),
        "📊 *TRADING DETAILS*".to_string(),
        format!("• Last Price: Rp {}", format_number(alert.last_close)),
        format!("• *Entry Price*: Rp {}", format_number(alert.entry_price)),
        format!("• *Date*: {}", alert.last_date),
        format!("• Entry Gap: {:+.1}%", alert.entry_gap_percent),
        String::new(),
        "🎯 *TRADING LEVELS*".to_string(),
        format!("• *Stop Loss*: Rp {}", format_currency(alert.stop)),
        format!("• *Target*: Rp {}", format_currency(alert.target)),
        format!("• Risk/Reward: 1:{:.2}", alert.risk_reward),
        String::new(),
        "📈 *ANALYSIS METRICS*".to_string(),
        format!("• *Confluence Score*: {:.1}/10", alert.confluence_score),
    ];

    if !alert.confluence_hits.is_empty() {
        lines.push("• *Confluence Details*:".to_string());
        lines.extend(
            alert
                .confluence_hits
                .split('|')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| format!("  - ✓ {}", item)),
        );
    }

    lines.extend([
        format!("• Backtest Win Rate: {:.1}%", alert.backtest_win_rate),
        format!("• Total Trades: {}", alert.total_trades),
        format!("• Confidence: {:.1}%", alert.confidence_score),
        String::new(),
        "💭 *SENTIMENT ANALYSIS*".to_string(),
        format!("• Overall: {}", title_case(&alert.overall_sentiment)),
        format!("• Sentiment Score: {:.1}%", alert.sentiment_score),
        String::new(),
        "📋 *SUMMARY*".to_string(),
        alert.analysis_summary.clone(),
        String::new(),
        "━━━━━━━━━━━━━━━━━━━━".to_string(),
        "❓ *Punya pertanyaan tentang signal ini?*".to_string(),
        "• Metode perhitungan".to_string(),
        "• Analisis teknikal".to_string(),
        "• Analisis sentimen".to_string(),
        "• Strategi trading".to_string(),
        String::new(),
        "Silahkan tanyakan langsung! 💬".to_string(),
    ]);

    lines.join("\n")
}

/// Group digits with `,` every three places from the right; the sign stays outside
pub fn format_number(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);

    if value < 0 {
        grouped.push('-');
    }

    for (i, digit) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    grouped
}

/// Truncate toward zero, then group like `format_number`
pub fn format_currency(value: f64) -> String {
    format_number(value.trunc() as i64)
}

/// Upper-case the first letter of every word, leaving the rest as is.
/// Only letters, digits and `_` continue a word.
pub fn title_case(text: &str) -> String {
    let mut titled = String::with_capacity(text.len());
    let mut at_word_start = true;

    for c in text.chars() {
        if at_word_start {
            titled.extend(c.to_uppercase());
        } else {
            titled.push(c);
        }
        at_word_start = !(c.is_alphanumeric() || c == '_');
    }

    titled
}
