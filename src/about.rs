pub const ASSAY_AUDIT_DISPLAY_VERSION: &str = env!("ASSAY_AUDIT_DISPLAY_VERSION");
pub const ASSAY_AUDIT_BUILD_N: &str = env!("ASSAY_AUDIT_BUILD_N");

pub fn version_cli_text() -> String {
    format!(
        "assay-audit {}\nBuild {}\nProtocol {}\nConsistency audits for genomic experiment metadata",
        ASSAY_AUDIT_DISPLAY_VERSION,
        ASSAY_AUDIT_BUILD_N,
        assay_audit_protocol::PROTOCOL_VERSION
    )
}
