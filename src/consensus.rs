//! Producer scheduling.
//!
//! Time is divided into slots of `block_interval` seconds. Slot 1 is the
//! first slot after the head block; the producer for a slot rotates through
//! the active producers by absolute slot number, so missed slots still
//! advance the schedule.

use crate::block::BlockHeader;
use crate::error::{ChainError, Result};
use crate::objects::{DynamicGlobalPropertyObject, GlobalPropertyObject, ProducerInfo};
use crate::types::Signature;

/// Read-only view of the schedule at the current head.
pub struct ProducerSchedule<'a> {
    props: &'a GlobalPropertyObject,
    dynamic: &'a DynamicGlobalPropertyObject,
}

impl<'a> ProducerSchedule<'a> {
    pub fn new(props: &'a GlobalPropertyObject, dynamic: &'a DynamicGlobalPropertyObject) -> Self {
        ProducerSchedule { props, dynamic }
    }

    fn interval(&self) -> u32 {
        self.props.parameters.block_interval.max(1)
    }

    /// Start of `slot` slots after the head. Slot 0 means "no slot" and maps
    /// to time 0.
    pub fn slot_time(&self, slot: u32) -> u32 {
        if slot == 0 {
            return 0;
        }
        let interval = self.interval();
        let head_slot_time = self.dynamic.time / interval * interval;
        head_slot_time.saturating_add(slot.saturating_mul(interval))
    }

    /// Slot containing `when`, or 0 if `when` is not after the head.
    pub fn slot_at_time(&self, when: u32) -> u32 {
        let first_slot_time = self.slot_time(1);
        if when < first_slot_time {
            return 0;
        }
        (when - first_slot_time) / self.interval() + 1
    }

    pub fn scheduled_producer(&self, slot: u32) -> Option<&'a ProducerInfo> {
        let producers = &self.props.active_producers;
        if producers.is_empty() {
            return None;
        }
        let absolute = self.dynamic.current_aslot + u64::from(slot);
        let index = (absolute % producers.len() as u64) as usize;
        producers.get(index)
    }

    /// Check the header's timing, producer and signature against the
    /// schedule. Returns the slot the block occupies.
    pub fn validate_header(
        &self,
        header: &BlockHeader,
        signature: &Signature,
        check_signature: bool,
    ) -> Result<u32> {
        let interval = self.interval();
        if header.timestamp % interval != 0 {
            return Err(ChainError::BlockTimestamp(format!(
                "{} is not aligned to the {interval}s interval",
                header.timestamp
            )));
        }
        if header.timestamp <= self.dynamic.time {
            return Err(ChainError::BlockTimestamp(format!(
                "{} is not after the head time {}",
                header.timestamp, self.dynamic.time
            )));
        }
        let slot = self.slot_at_time(header.timestamp);
        let scheduled = self.scheduled_producer(slot).ok_or_else(|| {
            ChainError::BlockValidate("no active producers are scheduled".into())
        })?;
        if scheduled.account != header.producer {
            return Err(ChainError::WrongProducer {
                expected: scheduled.account.clone(),
                actual: header.producer.clone(),
            });
        }
        if check_signature && !scheduled.signing_key.verify(&header.digest()?, signature) {
            return Err(ChainError::BadProducerSignature);
        }
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrivateKey;

    fn producer(name: &str) -> ProducerInfo {
        ProducerInfo {
            account: name.to_string(),
            signing_key: PrivateKey::from_seed(name).public_key(),
        }
    }

    fn state(head_time: u32, aslot: u64) -> (GlobalPropertyObject, DynamicGlobalPropertyObject) {
        let props = GlobalPropertyObject {
            active_producers: vec![producer("alpha"), producer("beta"), producer("gamma")],
            ..Default::default()
        };
        let dynamic = DynamicGlobalPropertyObject {
            time: head_time,
            current_aslot: aslot,
            ..Default::default()
        };
        (props, dynamic)
    }

    #[test]
    fn test_slot_arithmetic() {
        let (props, dynamic) = state(300, 0);
        let schedule = ProducerSchedule::new(&props, &dynamic);
        assert_eq!(schedule.slot_time(0), 0);
        assert_eq!(schedule.slot_time(1), 303);
        assert_eq!(schedule.slot_at_time(300), 0);
        assert_eq!(schedule.slot_at_time(303), 1);
        assert_eq!(schedule.slot_at_time(305), 1);
        assert_eq!(schedule.slot_at_time(309), 3);
    }

    #[test]
    fn test_rotation_counts_missed_slots() {
        let (props, dynamic) = state(300, 4);
        let schedule = ProducerSchedule::new(&props, &dynamic);
        // absolute slot 5 -> index 2
        assert_eq!(schedule.scheduled_producer(1).unwrap().account, "gamma");
        assert_eq!(schedule.scheduled_producer(2).unwrap().account, "alpha");
    }

    #[test]
    fn test_validate_header() {
        let (props, dynamic) = state(300, 0);
        let schedule = ProducerSchedule::new(&props, &dynamic);
        let key = PrivateKey::from_seed("beta");
        let header = BlockHeader {
            timestamp: 303,
            producer: "beta".into(),
            ..Default::default()
        };
        let signature = key.sign(&header.digest().unwrap());
        assert_eq!(schedule.validate_header(&header, &signature, true).unwrap(), 1);

        let wrong = BlockHeader {
            producer: "alpha".into(),
            ..header.clone()
        };
        assert!(matches!(
            schedule.validate_header(&wrong, &signature, true),
            Err(ChainError::WrongProducer { .. })
        ));

        let forged = PrivateKey::from_seed("mallory").sign(&header.digest().unwrap());
        assert!(matches!(
            schedule.validate_header(&header, &forged, true),
            Err(ChainError::BadProducerSignature)
        ));
        schedule.validate_header(&header, &forged, false).unwrap();

        let unaligned = BlockHeader {
            timestamp: 304,
            ..header
        };
        assert_eq!(
            schedule
                .validate_header(&unaligned, &signature, false)
                .unwrap_err()
                .code(),
            3_020_005
        );
    }
}
