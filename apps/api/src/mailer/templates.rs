// Message bodies for every email the service sends.
// Each builder returns a complete `Email`; callers only choose the recipient data.

use chrono::{DateTime, Utc};

use crate::billing::plans::Tier;
use crate::mailer::Email;

const PRODUCT_NAME: &str = "Listing Media";

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn wrap(body: &str) -> String {
    format!(
        "<div style=\"font-family:Arial,sans-serif;max-width:560px;margin:0 auto\">{body}\
         <p style=\"color:#888;font-size:12px\">{PRODUCT_NAME}</p></div>"
    )
}

pub fn magic_link(to: &str, link: &str, code: &str, ttl_minutes: i64) -> Email {
    let link_html = escape_html(link);
    Email {
        to: to.to_string(),
        subject: format!("Your {PRODUCT_NAME} sign-in link"),
        html: wrap(&format!(
            "<p>Click the button below to sign in.</p>\
             <p><a href=\"{link_html}\" style=\"padding:10px 18px;background:#111;color:#fff;\
             text-decoration:none;border-radius:4px\">Sign in</a></p>\
             <p>Or enter this code: <strong style=\"font-size:20px;letter-spacing:3px\">{code}</strong></p>\
             <p>The link and code expire in {ttl_minutes} minutes. If you did not ask to sign in, ignore this email.</p>"
        )),
        text: format!(
            "Sign in to {PRODUCT_NAME}: {link}\n\nOr enter this code: {code}\n\n\
             The link and code expire in {ttl_minutes} minutes."
        ),
    }
}

pub fn subscription_activated(
    to: &str,
    tier: Tier,
    plan: &str,
    next_billing: Option<DateTime<Utc>>,
) -> Email {
    let label = crate::billing::plans::features_for(tier).label;
    let renewal = next_billing
        .map(|t| format!("Next billing date: {}.", t.format("%B %-d, %Y")))
        .unwrap_or_default();
    Email {
        to: to.to_string(),
        subject: format!("Your {label} plan is active"),
        html: wrap(&format!(
            "<p>Thanks for subscribing! Your <strong>{label}</strong> plan ({}) is now active.</p><p>{renewal}</p>",
            escape_html(plan)
        )),
        text: format!("Your {label} plan ({plan}) is now active. {renewal}"),
    }
}

pub fn subscription_canceled(to: &str, plan: &str, superseded: bool) -> Email {
    let reason = if superseded {
        "It was replaced by your new subscription."
    } else {
        "You will keep access until the end of the current period, if any remains."
    };
    Email {
        to: to.to_string(),
        subject: format!("Your {PRODUCT_NAME} subscription was canceled"),
        html: wrap(&format!(
            "<p>Your subscription <strong>{}</strong> has been canceled.</p><p>{reason}</p>",
            escape_html(plan)
        )),
        text: format!("Your subscription {plan} has been canceled. {reason}"),
    }
}

pub fn referral_invite(to: &str, referrer_email: &str, link: &str) -> Email {
    Email {
        to: to.to_string(),
        subject: format!("{referrer_email} invited you to {PRODUCT_NAME}"),
        html: wrap(&format!(
            "<p>{} invited you to {PRODUCT_NAME}, the easiest way to deliver listing photos to clients.</p>\
             <p><a href=\"{}\">Accept the invite</a> and you both get a free month of Personal.</p>",
            escape_html(referrer_email),
            escape_html(link)
        )),
        text: format!(
            "{referrer_email} invited you to {PRODUCT_NAME}. Accept the invite and you both get a free month: {link}"
        ),
    }
}
