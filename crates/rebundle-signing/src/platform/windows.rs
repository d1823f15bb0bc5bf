//! mssign32 bindings
//!
//! This module is only compiled on Windows.

#![allow(non_snake_case, non_camel_case_types)]

use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use windows::core::{s, w, IUnknown, Interface};
use windows::Win32::Foundation::HMODULE;
use windows::Win32::Security::Cryptography::{
    CertAddEncodedCertificateToStore, CertCloseStore, CertFreeCertificateContext, CertOpenStore,
    CERT_CONTEXT, CERT_OPEN_STORE_FLAGS, CERT_QUERY_ENCODING_TYPE, CERT_STORE_ADD_REPLACE_EXISTING,
    CERT_STORE_PROV_MEMORY, HCERTSTORE, HCRYPTPROV_LEGACY, PKCS_7_ASN_ENCODING, X509_ASN_ENCODING,
};
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};
use windows::Win32::System::Memory::{LocalAlloc, LMEM_FIXED};

use super::{EnvelopeInvocation, EnvelopeReturn, NativeHandle, E_FAIL};
use crate::callback::DigestSignCallback;
use crate::error::{Result, SigningError};
use crate::store::InMemoryCertificateStore;
use crate::subject::ParameterBlock;

const SIGNER_SUBJECT_FILE: u32 = 1;
const SIGNER_CERT_STORE: u32 = 2;
const SIGNER_CERT_POLICY_CHAIN_NO_ROOT: u32 = 8;
const SIGNER_AUTHCODE_ATTR: u32 = 1;
const DIGEST_SIGN: u32 = 1;

#[repr(C)]
struct CRYPT_DATA_BLOB {
    cbData: u32,
    pbData: *mut u8,
}

#[repr(C)]
struct SIGNER_FILE_INFO {
    cbSize: u32,
    pwszFileName: *const u16,
    hFile: *mut c_void,
}

#[repr(C)]
struct SIGNER_SUBJECT_INFO {
    cbSize: u32,
    pdwIndex: *mut u32,
    dwSubjectChoice: u32,
    pSignerFileInfo: *mut SIGNER_FILE_INFO,
}

#[repr(C)]
struct SIGNER_CERT_STORE_INFO {
    cbSize: u32,
    pSigningCert: *const CERT_CONTEXT,
    dwCertPolicy: u32,
    hCertStore: *mut c_void,
}

#[repr(C)]
struct SIGNER_CERT {
    cbSize: u32,
    dwCertChoice: u32,
    pCertStoreInfo: *mut SIGNER_CERT_STORE_INFO,
    hwnd: *mut c_void,
}

#[repr(C)]
struct SIGNER_ATTR_AUTHCODE {
    cbSize: u32,
    fCommercial: i32,
    fIndividual: i32,
    pwszName: *const u16,
    pwszInfo: *const u16,
}

#[repr(C)]
struct SIGNER_SIGNATURE_INFO {
    cbSize: u32,
    algidHash: u32,
    dwAttrChoice: u32,
    pAttrAuthcode: *mut SIGNER_ATTR_AUTHCODE,
    psAuthenticated: *mut c_void,
    psUnauthenticated: *mut c_void,
}

type PFN_AUTHENTICODE_DIGEST_SIGN = unsafe extern "system" fn(
    pSigningCert: *const CERT_CONTEXT,
    pMetadataBlob: *const CRYPT_DATA_BLOB,
    digestAlgId: u32,
    pbToBeSignedDigest: *const u8,
    cbToBeSignedDigest: u32,
    pSignedDigest: *mut CRYPT_DATA_BLOB,
) -> i32;

#[repr(C)]
struct SIGNER_DIGEST_SIGN_INFO {
    cbSize: u32,
    dwDigestSignChoice: u32,
    pfnAuthenticodeDigestSign: PFN_AUTHENTICODE_DIGEST_SIGN,
    pMetadataBlob: *mut CRYPT_DATA_BLOB,
    dwReserved: u32,
    dwReserved2: u32,
    dwReserved3: u32,
}

#[repr(C)]
struct SIGNER_SIGN_EX3_PARAMS {
    dwFlags: u32,
    pSubjectInfo: *mut SIGNER_SUBJECT_INFO,
    pSigningCert: *mut SIGNER_CERT,
    pSignatureInfo: *mut SIGNER_SIGNATURE_INFO,
    pProviderInfo: *mut c_void,
    dwTimestampFlags: u32,
    pszTimestampAlgorithmOid: *const u8,
    pwszTimestampURL: *const u16,
    psRequest: *mut c_void,
    pSignCallBack: *mut SIGNER_DIGEST_SIGN_INFO,
    ppSignerContext: *mut *mut c_void,
    pCryptoPolicy: *mut c_void,
    pReserved: *mut c_void,
}

#[repr(C)]
struct APPX_SIP_CLIENT_DATA {
    pSignerParams: *mut SIGNER_SIGN_EX3_PARAMS,
    pAppxSipState: *mut c_void,
}

type SignerSignEx3Fn = unsafe extern "system" fn(
    dwFlags: u32,
    pSubjectInfo: *mut SIGNER_SUBJECT_INFO,
    pSignerCert: *mut SIGNER_CERT,
    pSignatureInfo: *mut SIGNER_SIGNATURE_INFO,
    pProviderInfo: *mut c_void,
    dwTimestampFlags: u32,
    pszTimestampAlgorithmOid: *const u8,
    pwszHttpTimeStamp: *const u16,
    psRequest: *mut c_void,
    pSipData: *mut c_void,
    ppSignerContext: *mut *mut c_void,
    pCryptoPolicy: *mut c_void,
    pDigestSignInfo: *mut SIGNER_DIGEST_SIGN_INFO,
    pReserved: *mut c_void,
) -> i32;

type SignerFreeSignerContextFn = unsafe extern "system" fn(pSignerContext: *mut c_void) -> i32;

/// Resolved entry points of mssign32.dll
///
/// The module is never unloaded.
#[derive(Debug)]
pub(crate) struct NativeLibrary {
    sign_ex3: SignerSignEx3Fn,
    free_context: SignerFreeSignerContextFn,
}

impl NativeLibrary {
    pub(crate) fn load() -> Result<Self> {
        let module: HMODULE = unsafe { LoadLibraryW(w!("mssign32.dll")) }
            .map_err(|e| SigningError::Configuration(format!("Failed to load mssign32.dll: {}", e)))?;

        let sign_ex3 = unsafe { GetProcAddress(module, s!("SignerSignEx3")) }
            .ok_or_else(|| missing_export("SignerSignEx3"))?;
        let free_context = unsafe { GetProcAddress(module, s!("SignerFreeSignerContext")) }
            .ok_or_else(|| missing_export("SignerFreeSignerContext"))?;

        // SAFETY: the exports have the documented signatures above.
        unsafe {
            Ok(Self {
                sign_ex3: std::mem::transmute::<_, SignerSignEx3Fn>(sign_ex3),
                free_context: std::mem::transmute::<_, SignerFreeSignerContextFn>(free_context),
            })
        }
    }

    pub(crate) fn sign(&self, invocation: &EnvelopeInvocation<'_>) -> EnvelopeReturn<WindowsHandle> {
        let store = match NativeStore::open(invocation.store) {
            Ok(store) => store,
            Err(status) => return EnvelopeReturn::status(status),
        };

        let mut file_info = SIGNER_FILE_INFO {
            cbSize: std::mem::size_of::<SIGNER_FILE_INFO>() as u32,
            pwszFileName: invocation.subject.as_ptr(),
            hFile: ptr::null_mut(),
        };
        let mut index = 0u32;
        let mut subject_info = SIGNER_SUBJECT_INFO {
            cbSize: std::mem::size_of::<SIGNER_SUBJECT_INFO>() as u32,
            pdwIndex: &mut index,
            dwSubjectChoice: SIGNER_SUBJECT_FILE,
            pSignerFileInfo: &mut file_info,
        };

        let mut store_info = SIGNER_CERT_STORE_INFO {
            cbSize: std::mem::size_of::<SIGNER_CERT_STORE_INFO>() as u32,
            pSigningCert: store.leaf,
            dwCertPolicy: SIGNER_CERT_POLICY_CHAIN_NO_ROOT,
            hCertStore: store.handle.0,
        };
        let mut signer_cert = SIGNER_CERT {
            cbSize: std::mem::size_of::<SIGNER_CERT>() as u32,
            dwCertChoice: SIGNER_CERT_STORE,
            pCertStoreInfo: &mut store_info,
            hwnd: ptr::null_mut(),
        };

        let mut authcode = SIGNER_ATTR_AUTHCODE {
            cbSize: std::mem::size_of::<SIGNER_ATTR_AUTHCODE>() as u32,
            fCommercial: 0,
            fIndividual: 0,
            pwszName: invocation
                .description
                .map_or(ptr::null(), |d| d.as_ptr()),
            pwszInfo: invocation
                .description_url
                .map_or(ptr::null(), |u| u.as_ptr()),
        };
        let mut signature_info = SIGNER_SIGNATURE_INFO {
            cbSize: std::mem::size_of::<SIGNER_SIGNATURE_INFO>() as u32,
            algidHash: invocation.digest.alg_id(),
            dwAttrChoice: SIGNER_AUTHCODE_ATTR,
            pAttrAuthcode: &mut authcode,
            psAuthenticated: ptr::null_mut(),
            psUnauthenticated: ptr::null_mut(),
        };

        let mut metadata = CRYPT_DATA_BLOB {
            cbData: std::mem::size_of::<usize>() as u32,
            pbData: invocation.callback as *const DigestSignCallback<'_> as *mut u8,
        };
        let mut digest_sign_info = SIGNER_DIGEST_SIGN_INFO {
            cbSize: std::mem::size_of::<SIGNER_DIGEST_SIGN_INFO>() as u32,
            dwDigestSignChoice: DIGEST_SIGN,
            pfnAuthenticodeDigestSign: digest_sign_trampoline,
            pMetadataBlob: &mut metadata,
            dwReserved: 0,
            dwReserved2: 0,
            dwReserved3: 0,
        };

        let timestamp = invocation.timestamp;
        let timestamp_oid = timestamp
            .algorithm_oid
            .as_ref()
            .map_or(ptr::null(), |oid| oid.as_ptr() as *const u8);
        let timestamp_url = timestamp.url.as_ref().map_or(ptr::null(), |u| u.as_ptr());
        let flags = invocation.subject_config.flags;

        let mut context: *mut c_void = ptr::null_mut();

        let mut ex3_params = SIGNER_SIGN_EX3_PARAMS {
            dwFlags: flags,
            pSubjectInfo: &mut subject_info,
            pSigningCert: &mut signer_cert,
            pSignatureInfo: &mut signature_info,
            pProviderInfo: ptr::null_mut(),
            dwTimestampFlags: timestamp.flags,
            pszTimestampAlgorithmOid: timestamp_oid,
            pwszTimestampURL: timestamp_url,
            psRequest: ptr::null_mut(),
            pSignCallBack: &mut digest_sign_info,
            ppSignerContext: &mut context,
            pCryptoPolicy: ptr::null_mut(),
            pReserved: ptr::null_mut(),
        };
        let mut client_data = APPX_SIP_CLIENT_DATA {
            pSignerParams: &mut ex3_params,
            pAppxSipState: ptr::null_mut(),
        };
        let sip_data: *mut c_void = match invocation.subject_config.block {
            ParameterBlock::FileInfo => ptr::null_mut(),
            ParameterBlock::PackageClientData => {
                &mut client_data as *mut APPX_SIP_CLIENT_DATA as *mut c_void
            }
        };

        // SAFETY: every pointer refers to a local that outlives the call, and
        // the callback reference is scoped to this invocation.
        let status = unsafe {
            (self.sign_ex3)(
                flags,
                &mut subject_info,
                &mut signer_cert,
                &mut signature_info,
                ptr::null_mut(),
                timestamp.flags,
                timestamp_oid,
                timestamp_url,
                ptr::null_mut(),
                sip_data,
                &mut context,
                ptr::null_mut(),
                &mut digest_sign_info,
                ptr::null_mut(),
            )
        };

        let signer_context = (!context.is_null()).then_some(WindowsHandle::SignerContext {
            context,
            free: self.free_context,
        });
        let package_state = (!client_data.pAppxSipState.is_null())
            .then_some(WindowsHandle::PackageState(client_data.pAppxSipState));

        drop(store);

        EnvelopeReturn {
            status,
            signer_context,
            package_state,
        }
    }
}

fn missing_export(name: &str) -> SigningError {
    SigningError::Configuration(format!("mssign32.dll does not export {}", name))
}

/// Resource returned by SignerSignEx3
#[derive(Debug)]
pub enum WindowsHandle {
    /// `SIGNER_CONTEXT`, freed with SignerFreeSignerContext
    SignerContext {
        context: *mut c_void,
        free: SignerFreeSignerContextFn,
    },
    /// COM state left in `APPX_SIP_CLIENT_DATA`
    PackageState(*mut c_void),
}

impl NativeHandle for WindowsHandle {
    fn release(self) {
        // SAFETY: each handle was produced by the call it is released for and
        // is released once, by value.
        unsafe {
            match self {
                Self::SignerContext { context, free } => {
                    free(context);
                }
                Self::PackageState(state) => {
                    drop(IUnknown::from_raw(state));
                }
            }
        }
    }
}

/// Native memory store mirroring an [`InMemoryCertificateStore`]
struct NativeStore {
    handle: HCERTSTORE,
    leaf: *const CERT_CONTEXT,
}

impl NativeStore {
    fn open(source: &InMemoryCertificateStore) -> std::result::Result<Self, i32> {
        let encoding = CERT_QUERY_ENCODING_TYPE(X509_ASN_ENCODING.0 | PKCS_7_ASN_ENCODING.0);

        // SAFETY: a memory store takes no parameters.
        let handle = unsafe {
            CertOpenStore(
                CERT_STORE_PROV_MEMORY,
                encoding,
                HCRYPTPROV_LEGACY::default(),
                CERT_OPEN_STORE_FLAGS(0),
                None,
            )
        }
        .map_err(|e| e.code().0)?;

        let mut store = Self {
            handle,
            leaf: ptr::null(),
        };

        for (i, der) in source.certificates().enumerate() {
            let mut context: *mut CERT_CONTEXT = ptr::null_mut();
            let wants_context = i == 0;
            // SAFETY: `der` is a complete encoded certificate.
            unsafe {
                CertAddEncodedCertificateToStore(
                    store.handle,
                    encoding,
                    der,
                    CERT_STORE_ADD_REPLACE_EXISTING,
                    wants_context.then_some(&mut context as *mut *mut CERT_CONTEXT),
                )
            }
            .map_err(|e| e.code().0)?;
            if wants_context {
                store.leaf = context;
            }
        }

        if store.leaf.is_null() {
            return Err(E_FAIL);
        }
        Ok(store)
    }
}

impl Drop for NativeStore {
    fn drop(&mut self) {
        // SAFETY: both were created in `open` and are freed once here.
        unsafe {
            if !self.leaf.is_null() {
                let _ = CertFreeCertificateContext(Some(self.leaf));
            }
            let _ = CertCloseStore(self.handle, 0);
        }
    }
}

/// Entry point the platform calls with each digest to sign
unsafe extern "system" fn digest_sign_trampoline(
    _signing_cert: *const CERT_CONTEXT,
    metadata: *const CRYPT_DATA_BLOB,
    alg_id: u32,
    digest: *const u8,
    digest_len: u32,
    signed: *mut CRYPT_DATA_BLOB,
) -> i32 {
    if metadata.is_null() || digest.is_null() || signed.is_null() {
        return super::E_INVALIDARG;
    }

    let result = catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: the metadata blob carries the callback reference installed
        // by `NativeLibrary::sign`, which is alive for the whole call.
        let callback = &*((*metadata).pbData as *const DigestSignCallback<'_>);
        let digest = std::slice::from_raw_parts(digest, digest_len as usize);
        callback.sign(alg_id, digest)
    }));

    let signature = match result {
        Ok(Ok(signature)) => signature,
        Ok(Err(status)) => return status,
        Err(_) => return E_FAIL,
    };

    // The platform frees the signature buffer with LocalFree.
    let buffer = match LocalAlloc(LMEM_FIXED, signature.len()) {
        Ok(buffer) => buffer.0 as *mut u8,
        Err(e) => return e.code().0,
    };
    ptr::copy_nonoverlapping(signature.as_ptr(), buffer, signature.len());
    (*signed).cbData = signature.len() as u32;
    (*signed).pbData = buffer;
    0
}
