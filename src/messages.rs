//! User-facing message text, pre-escaped for Telegram MarkdownV2.

pub const WELCOME: &str = "*Netflix Code Fetcher Bot*\n\n\
    I will fetch the link for your Netflix verification code from email\\.\n\n\
    *Commands:*\n\
    /netflix\\_code \\- Get the latest Netflix verification code\n\
    /netflix\\_help \\- Show this help message\n\n\
    *Note:* Request your Netflix code first, then use /netflix\\_code to fetch it\\!";

pub const HELP: &str = "*Netflix Code Fetcher Bot Help*\n\n\
    *Available Commands:*\n\
    /netflix\\_code \\- Fetch the latest Netflix verification code\n\
    /netflix\\_start \\- Show welcome message\n\
    /netflix\\_help \\- Show this help\n\n\
    *How it works:*\n\
    1\\. Request a verification code from Netflix\n\
    2\\. Use /netflix\\_code command\n\
    3\\. I'll fetch your verification code\n\n\
    *Note:* Make sure to request a new code before using /netflix\\_code";

pub const LINK_NOT_FOUND: &str =
    "*Error*: Could not find verification link in the email\\. Please request a new code\\.";

pub const NO_MATCHING_EMAIL: &str =
    "*Error*: No Netflix verification code emails found\\. Request a code from Netflix first\\.";

pub const FETCH_FAILED: &str = "*Error*: Could not fetch email\\. Please try again later\\.";

pub const UNAUTHORIZED: &str = "*Error*: You are not authorized to use this bot\\.";
