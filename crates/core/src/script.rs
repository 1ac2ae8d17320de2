//! Remote patch script template.
//!
//! The script body is opaque to the engine. The only operation performed on
//! it is textual substitution of the `{kb}` placeholder.

use crate::error::CoreError;
use crate::kb::KbId;

/// Placeholder replaced with the KB identifier.
pub const KB_PLACEHOLDER: &str = "{kb}";

/// Built-in PowerShell script: installs one KB and prints a JSON record with
/// the KB and whether a reboot is pending.
pub const DEFAULT_POWERSHELL_TEMPLATE: &str = r#"
$kb = '{kb}'
Write-Host "Installing patch: $kb"
Install-WindowsUpdate -KBArticleID $kb -AcceptAll -AutoReboot

# Check if reboot required
$pendingReboot = (Get-ItemProperty "HKLM:\SOFTWARE\Microsoft\Windows\CurrentVersion\Component Based Servicing\RebootPending" -ErrorAction SilentlyContinue) -ne $null

$result = @{
    KB = $kb
    RebootRequired = $pendingReboot
}
$result | ConvertTo-Json
"#;

/// A script template containing at least one `{kb}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptTemplate {
    body: String,
}

impl ScriptTemplate {
    pub fn new(body: impl Into<String>) -> Result<Self, CoreError> {
        let body = body.into();
        if !body.contains(KB_PLACEHOLDER) {
            return Err(CoreError::Validation(format!(
                "Script template must contain the {KB_PLACEHOLDER} placeholder"
            )));
        }
        Ok(Self { body })
    }

    /// Substitute `kb` for every placeholder occurrence.
    pub fn render(&self, kb: &KbId) -> String {
        self.body.replace(KB_PLACEHOLDER, kb.as_str())
    }
}

impl Default for ScriptTemplate {
    fn default() -> Self {
        Self {
            body: DEFAULT_POWERSHELL_TEMPLATE.to_string(),
        }
    }
}
