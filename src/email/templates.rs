use crate::config::LinkConfig;
use crate::email::dispatcher::OutboundEmail;
use crate::users::repo_types::User;

pub fn welcome_email(user: &User) -> OutboundEmail {
    let body = format!(
        "Hi {name},\n\
         \n\
         Welcome to our platform! Your account is set up, and you're almost ready. \
         Please verify your email to gain access.\n\
         \n\
         For any assistance, feel free to reach out. We're here to support you.\n\
         \n\
         The Platform Team\n",
        name = user.display_name()
    );
    OutboundEmail {
        to: user.email.clone(),
        subject: "Welcome Email".into(),
        body,
        html: false,
    }
}

pub fn verification_email(
    user: &User,
    links: &LinkConfig,
    uid: &str,
    token: &str,
) -> OutboundEmail {
    let activation_link = format!("{}/users/activate/{uid}/{token}", links.public_base_url);
    let body = format!(
        "Hi {name},\n\
         \n\
         Please verify your email address by following the link below:\n\
         \n\
         {activation_link}\n\
         \n\
         This link will expire in 24 hours.\n\
         \n\
         The Platform Team\n",
        name = user.display_name()
    );
    OutboundEmail {
        to: user.email.clone(),
        subject: "Verify Your Email".into(),
        body,
        html: false,
    }
}

pub fn password_reset_email(
    user: &User,
    links: &LinkConfig,
    uid: &str,
    token: &str,
) -> OutboundEmail {
    let reset_link = format!(
        "{}/users/password-reset-confirm/{uid}/{token}",
        links.public_base_url
    );
    let body = format!(
        "Hi {name},\n\
         \n\
         You requested a password reset. Click below to set a new password:\n\
         {reset_link}\n\
         \n\
         If you did not request this reset, please ignore this email and ensure \
         your account is secure.\n",
        name = user.display_name()
    );
    OutboundEmail {
        to: user.email.clone(),
        subject: "Password Reset Request - Platform".into(),
        body,
        html: false,
    }
}

pub fn password_reset_confirmation_email(user: &User) -> OutboundEmail {
    let body = format!(
        "Hi {name},\n\
         \n\
         Your password has been reset successfully.\n\
         \n\
         If this wasn't you, contact support.\n",
        name = user.display_name()
    );
    OutboundEmail {
        to: user.email.clone(),
        subject: "Password Reset Successful - Platform".into(),
        body,
        html: false,
    }
}
