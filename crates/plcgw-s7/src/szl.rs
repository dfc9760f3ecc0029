// ── System status list decoding ──
//
// Only the lists needed to identify a CPU: 0x0011 (module identification)
// and 0x001C (component identification).

use crate::client::CpuIdentity;

const MODULE_RECORD: u16 = 0x0001;
const FIRMWARE_RECORD: u16 = 0x0007;
const MODULE_NAME_RECORD: u16 = 0x0002;
const SERIAL_RECORD: u16 = 0x0005;
const MODULE_TYPE_RECORD: u16 = 0x0007;

const ORDER_CODE_LEN: usize = 20;

/// Fill order code and firmware from SZL 0x0011 records.
pub(crate) fn apply_module_identification(records: &[Vec<u8>], identity: &mut CpuIdentity) {
    if let Some(record) = find(records, MODULE_RECORD).or_else(|| records.first()) {
        identity.order_code = record.get(2..2 + ORDER_CODE_LEN).and_then(text);
    }

    let firmware = find(records, FIRMWARE_RECORD).or_else(|| records.last());
    if let Some(&[major, minor, patch]) = firmware.and_then(|r| r.get(r.len().saturating_sub(3)..))
    {
        identity.firmware = Some(format!("V{major}.{minor}.{patch}"));
    }
}

/// Fill module type and serial number from SZL 0x001C records.
pub(crate) fn apply_component_identification(records: &[Vec<u8>], identity: &mut CpuIdentity) {
    let field = |index| find(records, index).and_then(|r| r.get(2..)).and_then(text);

    identity.serial_number = field(SERIAL_RECORD);
    identity.module_type = field(MODULE_TYPE_RECORD).or_else(|| field(MODULE_NAME_RECORD));
}

fn find(records: &[Vec<u8>], index: u16) -> Option<&Vec<u8>> {
    records
        .iter()
        .find(|r| matches!(r.as_slice(), [high, low, ..] if u16::from_be_bytes([*high, *low]) == index))
}

/// Latin-1 text with NUL and space padding removed; `None` when blank.
fn text(raw: &[u8]) -> Option<String> {
    let s: String = raw
        .iter()
        .take_while(|b| **b != 0)
        .map(|b| char::from(*b))
        .collect();
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(index: u16, body: &[u8], len: usize) -> Vec<u8> {
        let mut r = index.to_be_bytes().to_vec();
        r.extend_from_slice(body);
        r.resize(len, 0);
        r
    }

    #[test]
    fn module_identification_yields_order_code_and_firmware() {
        let mut firmware = record(FIRMWARE_RECORD, b"                    ", 28);
        let n = firmware.len();
        firmware[n - 3..].copy_from_slice(&[3, 2, 6]);
        let records = vec![record(MODULE_RECORD, b"6ES7 315-2EH14-0AB0 ", 28), firmware];

        let mut identity = CpuIdentity::default();
        apply_module_identification(&records, &mut identity);

        assert_eq!(identity.order_code.as_deref(), Some("6ES7 315-2EH14-0AB0"));
        assert_eq!(identity.firmware.as_deref(), Some("V3.2.6"));
    }

    #[test]
    fn component_identification_prefers_module_type() {
        let records = vec![
            record(MODULE_NAME_RECORD, b"PLC_1", 34),
            record(SERIAL_RECORD, b"S C-X4U421302009", 34),
            record(MODULE_TYPE_RECORD, b"CPU 315-2 PN/DP", 34),
        ];

        let mut identity = CpuIdentity::default();
        apply_component_identification(&records, &mut identity);

        assert_eq!(identity.module_type.as_deref(), Some("CPU 315-2 PN/DP"));
        assert_eq!(identity.serial_number.as_deref(), Some("S C-X4U421302009"));
    }

    #[test]
    fn module_name_is_the_fallback() {
        let records = vec![record(MODULE_NAME_RECORD, b"PLC_1", 34)];

        let mut identity = CpuIdentity::default();
        apply_component_identification(&records, &mut identity);

        assert_eq!(identity.module_type.as_deref(), Some("PLC_1"));
        assert_eq!(identity.serial_number, None);
    }
}
