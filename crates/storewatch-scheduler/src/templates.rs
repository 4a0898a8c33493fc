//! Message rendering: recovery emails, admin stock alerts, chat texts.

use std::collections::BTreeMap;

use storewatch_core::types::{AbandonedCart, ChatMessage, LowStockAlert, OutgoingEmail};

/// WhatsApp template name for order confirmations.
pub const ORDER_CREATED_TEMPLATE: &str = "order_created";

/// Recovery link carried in every reminder.
pub fn recovery_link(frontend_base_url: &str, token: &str) -> String {
    format!(
        "{}/cart/recover?token={}",
        frontend_base_url.trim_end_matches('/'),
        token
    )
}

/// Discount amount for `total` at `percent` %.
pub fn discount_amount(total: f64, percent: u32) -> f64 {
    total * f64::from(percent) / 100.0
}

/// `1234567.5` → `1,234,567.50`.
pub fn format_amount(value: f64) -> String {
    let cents = (value.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::new();
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if value < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}{grouped}.{:02}", cents % 100)
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Reminder email for an abandoned cart.
pub fn recovery_email(
    cart: &AbandonedCart,
    discount_percent: u32,
    link: &str,
    store_name: &str,
) -> OutgoingEmail {
    let greeting_name = cart.user_name.as_deref().unwrap_or("there");
    let discount = discount_amount(cart.total, discount_percent);
    let new_total = cart.total - discount;

    let rows: String = cart
        .items
        .iter()
        .map(|item| {
            let image = item
                .image
                .as_deref()
                .map(|src| {
                    format!(
                        r#"<img src="{}" alt="" width="48" height="48" style="border-radius:4px;">"#,
                        escape(src)
                    )
                })
                .unwrap_or_default();
            format!(
                "<tr><td>{image}</td><td>{}</td><td>× {}</td><td style=\"text-align:right\">{}</td></tr>",
                escape(&item.name),
                item.quantity,
                format_amount(item.price)
            )
        })
        .collect();

    let totals = if discount_percent > 0 {
        format!(
            "<p>Subtotal: {}</p>\
             <p class=\"discount\">Discount ({discount_percent}%): -{}</p>\
             <p class=\"total\">New total: {}</p>",
            format_amount(cart.total),
            format_amount(discount),
            format_amount(new_total)
        )
    } else {
        format!("<p class=\"total\">Total: {}</p>", format_amount(cart.total))
    };

    let badge = if discount_percent > 0 {
        format!("<div class=\"badge\">🎉 {discount_percent}% OFF, just for you</div>")
    } else {
        String::new()
    };
    let cta = if discount_percent > 0 {
        format!("Complete my order with {discount_percent}% off")
    } else {
        "Complete my order".to_string()
    };

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<style>
  body {{ font-family: Arial, sans-serif; color: #333; }}
  .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
  .badge {{ background: #4CAF50; color: #fff; padding: 10px 20px; border-radius: 20px; display: inline-block; font-weight: bold; }}
  .discount {{ color: #4CAF50; }}
  .total {{ font-size: 18px; font-weight: bold; }}
  .button {{ background: #E31E24; color: #fff; padding: 14px 28px; text-decoration: none; border-radius: 5px; }}
</style>
</head>
<body>
<div class="container">
  <h2>🛒 Hi {name}!</h2>
  <p>You left some items in your cart at {store}. They are still waiting for you.</p>
  {badge}
  <h3>Items in your cart:</h3>
  <table width="100%">{rows}</table>
  {totals}
  <p><a class="button" href="{link}">{cta}</a></p>
  <p style="font-size:12px;color:#666">If the button does not work, open this link: {link}</p>
</div>
</body>
</html>"#,
        name = escape(greeting_name),
        store = escape(store_name),
        link = escape(link),
    );

    let mut text = format!(
        "Hi {greeting_name}!\n\nYou left some items in your cart at {store_name}.\n\n"
    );
    for item in &cart.items {
        text.push_str(&format!(
            "- {} × {} ({})\n",
            item.name,
            item.quantity,
            format_amount(item.price)
        ));
    }
    if discount_percent > 0 {
        text.push_str(&format!(
            "\nSubtotal: {}\nDiscount ({discount_percent}%): -{}\nNew total: {}\n",
            format_amount(cart.total),
            format_amount(discount),
            format_amount(new_total)
        ));
    } else {
        text.push_str(&format!("\nTotal: {}\n", format_amount(cart.total)));
    }
    text.push_str(&format!("\nFinish your order: {link}\n"));

    let subject = if discount_percent > 0 {
        format!("🎁 {discount_percent}% off your cart at {store_name}")
    } else {
        format!("🛒 Your cart at {store_name} is waiting")
    };

    OutgoingEmail {
        to: cart.user_email.clone(),
        subject,
        html,
        text: Some(text),
    }
}

/// One digest email covering every alert created in a scan.
pub fn low_stock_email(
    to: &str,
    alerts: &[LowStockAlert],
    admin_panel_url: &str,
    store_name: &str,
) -> OutgoingEmail {
    let rows: String = alerts
        .iter()
        .map(|a| {
            format!(
                "<tr><td>{}</td><td style=\"color:#d32f2f;font-weight:bold\">{}</td><td>{}</td></tr>",
                escape(&a.product_name),
                a.current_stock,
                a.minimum_stock
            )
        })
        .collect();

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<style>
  body {{ font-family: Arial, sans-serif; color: #333; }}
  .header {{ background: #d32f2f; color: #fff; padding: 20px; text-align: center; }}
  th {{ background: #f5f5f5; padding: 10px; text-align: left; border: 1px solid #ddd; }}
  td {{ padding: 10px; border: 1px solid #ddd; }}
</style>
</head>
<body>
<div class="header"><h2>⚠️ Low stock alert - {store}</h2></div>
<p>{count} product(s) are at or below their minimum stock:</p>
<table width="100%">
  <tr><th>Product</th><th>Current stock</th><th>Minimum stock</th></tr>
  {rows}
</table>
<p><a href="{panel}">Open the admin panel</a></p>
</body>
</html>"#,
        store = escape(store_name),
        count = alerts.len(),
        panel = escape(admin_panel_url),
    );

    let mut text = format!(
        "Low stock alert - {store_name}\n\n{} product(s) are at or below their minimum stock:\n",
        alerts.len()
    );
    for a in alerts {
        text.push_str(&format!(
            "- {}: {} (minimum {})\n",
            a.product_name, a.current_stock, a.minimum_stock
        ));
    }
    text.push_str(&format!("\nAdmin panel: {admin_panel_url}\n"));

    OutgoingEmail {
        to: to.to_string(),
        subject: format!("⚠️ Alert: {} product(s) with low stock", alerts.len()),
        html,
        text: Some(text),
    }
}

/// Short chat summary of a stock scan for admin phones.
pub fn low_stock_chat(to: &str, alerts: &[LowStockAlert], store_name: &str) -> ChatMessage {
    let mut body = format!("⚠️ {store_name}: {} product(s) with low stock\n", alerts.len());
    for a in alerts.iter().take(10) {
        body.push_str(&format!(
            "• {} ({}/{})\n",
            a.product_name, a.current_stock, a.minimum_stock
        ));
    }
    if alerts.len() > 10 {
        body.push_str(&format!("…and {} more\n", alerts.len() - 10));
    }
    let mut msg = ChatMessage::text(to, body.trim_end());
    msg.meta = Some(serde_json::json!({"kind": "low_stock"}));
    msg
}

/// Order confirmation for the customer's WhatsApp.
pub fn order_created_message(phone: &str, order_number: &str, total: f64) -> ChatMessage {
    let mut variables = BTreeMap::new();
    variables.insert("1".to_string(), order_number.to_string());
    variables.insert("2".to_string(), format_amount(total));
    let mut msg = ChatMessage::template(phone, ORDER_CREATED_TEMPLATE, variables);
    msg.meta = Some(serde_json::json!({"kind": "order_created", "order": order_number}));
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use storewatch_core::types::{AlertStatus, CartItem, CartStatus};

    fn cart(total: f64) -> AbandonedCart {
        let now = Utc::now();
        AbandonedCart {
            id: "c1".into(),
            user_email: "alice@example.com".into(),
            user_name: Some("Alice".into()),
            user_id: None,
            items: vec![CartItem {
                product_id: "p1".into(),
                name: "Laptop <Pro>".into(),
                image: Some("https://cdn.example.com/p1.png".into()),
                quantity: 1,
                price: total,
            }],
            total,
            abandoned_at: now,
            status: CartStatus::Abandoned,
            reminder_count: 0,
            last_reminder_at: None,
            recovery_token: "ab".repeat(32),
            recovery_discount: None,
            recovered_at: None,
            recovered_order_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(50_000.0), "50,000.00");
        assert_eq!(format_amount(2_500.0), "2,500.00");
        assert_eq!(format_amount(999.999), "1,000.00");
        assert_eq!(format_amount(0.5), "0.50");
        assert_eq!(format_amount(1_234_567.25), "1,234,567.25");
    }

    #[test]
    fn test_recovery_link() {
        assert_eq!(
            recovery_link("https://shop.example.com/", "abc"),
            "https://shop.example.com/cart/recover?token=abc"
        );
    }

    #[test]
    fn test_recovery_email_with_discount() {
        let c = cart(50_000.0);
        let link = recovery_link("https://shop.example.com", &c.recovery_token);
        let email = recovery_email(&c, 5, &link, "KZ Store");

        assert_eq!(email.to, "alice@example.com");
        assert!(email.subject.contains("5%"));
        assert!(email.html.contains("-2,500.00"));
        assert!(email.html.contains("47,500.00"));
        assert!(email.html.contains("Laptop &lt;Pro&gt;"));
        assert!(email.html.contains(&link));
        let text = email.text.unwrap();
        assert!(text.contains("Discount (5%): -2,500.00"));
        assert!(text.contains(&link));
    }

    #[test]
    fn test_recovery_email_without_discount() {
        let email = recovery_email(&cart(100.0), 0, "https://x/cart/recover?token=t", "KZ Store");
        assert!(!email.subject.contains('%'));
        assert!(!email.html.contains("Discount"));
        assert!(email.text.unwrap().contains("Total: 100.00"));
    }

    #[test]
    fn test_low_stock_digest_lists_every_alert() {
        let alert = |name: &str| LowStockAlert {
            id: name.into(),
            product_id: name.into(),
            product_name: name.into(),
            current_stock: 1,
            minimum_stock: 5,
            threshold_level: 5,
            status: AlertStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
            notes: None,
        };
        let alerts = vec![alert("Mouse"), alert("Keyboard")];
        let email = low_stock_email("ops@example.com", &alerts, "https://x/admin", "KZ Store");
        assert!(email.subject.contains("2 product(s)"));
        assert!(email.html.contains("Mouse") && email.html.contains("Keyboard"));

        let chat = low_stock_chat("+244900000000", &alerts, "KZ Store");
        assert!(chat.body.unwrap().contains("• Keyboard (1/5)"));
    }

    #[test]
    fn test_order_created_message() {
        let msg = order_created_message("+244900000000", "KZ-1001", 12_500.0);
        assert_eq!(msg.template_id.as_deref(), Some(ORDER_CREATED_TEMPLATE));
        assert_eq!(msg.variables["1"], "KZ-1001");
        assert_eq!(msg.variables["2"], "12,500.00");
        assert!(msg.body.is_none());
    }
}
